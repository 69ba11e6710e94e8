//! Fixed-window per-IP rate limiting for the generate endpoint.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::RwLock;

use super::error::ApiError;
use super::routes::AppState;
use crate::config::RateLimitConfig;

/// Prune expired windows once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Fixed-window request counter keyed by client address.
#[derive(Clone)]
pub struct RateLimiter {
    // ip -> (request_count, window_start)
    windows: Arc<RwLock<HashMap<IpAddr, (u32, Instant)>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.config.max_requests
    }

    /// Count one request from `ip` and decide whether it may proceed.
    pub async fn check(&self, ip: IpAddr) -> Decision {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Decision {
        let mut windows = self.windows.write().await;

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.config.window;
            windows.retain(|_, (_, start)| now.duration_since(*start) <= window);
        }

        let state = windows.entry(ip).or_insert((0, now));
        if now.duration_since(state.1) > self.config.window {
            *state = (0, now);
            tracing::debug!("Rate limit window reset for {}", ip);
        }

        state.0 = state.0.saturating_add(1);
        if state.0 > self.config.max_requests {
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(state.1));
            tracing::warn!("Rate limit exceeded for {}", ip);
            Decision::Limited { retry_after }
        } else {
            Decision::Allowed {
                remaining: self.config.max_requests - state.0,
            }
        }
    }
}

/// Middleware applying the shared limiter to the wrapped routes.
pub async fn enforce(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match state.rate_limiter.check(ip).await {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("ratelimit-limit", HeaderValue::from(state.rate_limiter.max_requests()));
            headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Decision::Limited { retry_after } => ApiError::RateLimited { retry_after }.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(window_secs),
        })
    }

    #[tokio::test]
    async fn test_limits_after_max_requests() {
        let limiter = limiter(2, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let now = Instant::now();

        assert_eq!(limiter.check_at(ip, now).await, Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at(ip, now).await, Decision::Allowed { remaining: 0 });
        match limiter.check_at(ip, now + Duration::from_secs(10)).await {
            Decision::Limited { retry_after } => assert_eq!(retry_after, Duration::from_secs(50)),
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = limiter(1, 60);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let now = Instant::now();

        assert!(matches!(limiter.check_at(ip, now).await, Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at(ip, now).await, Decision::Limited { .. }));
        assert_eq!(
            limiter.check_at(ip, now + Duration::from_secs(61)).await,
            Decision::Allowed { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        let a: IpAddr = "10.0.0.3".parse().unwrap();
        let b: IpAddr = "10.0.0.4".parse().unwrap();

        assert!(matches!(limiter.check_at(a, now).await, Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at(b, now).await, Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at(a, now).await, Decision::Limited { .. }));
    }
}
