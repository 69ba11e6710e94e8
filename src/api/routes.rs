//! HTTP router, shared state and server lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::rate_limit::{self, RateLimiter};
use super::relay;
use super::types::HealthResponse;
use crate::config::Config;
use crate::llm::{GeminiClient, TextGenerator};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Upstream generator; `None` when no credential is configured.
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Build state from configuration, creating the Gemini client if a key is set.
    pub fn new(config: Config) -> Self {
        let generator = config.api_key.clone().map(|key| {
            Arc::new(GeminiClient::with_endpoint(
                key,
                config.gemini_base_url.clone(),
                config.gemini_model.clone(),
            )) as Arc<dyn TextGenerator>
        });
        Self::with_generator(config, generator)
    }

    /// Build state around an explicit generator.
    pub fn with_generator(config: Config, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit);
        Self {
            config,
            generator,
            rate_limiter,
        }
    }
}

/// Assemble the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let generate_routes = Router::new()
        .route("/api/generate", post(relay::generate))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::enforce,
        ));

    let mut app = Router::new()
        .route("/api/health", get(health))
        .merge(generate_routes);

    if state.config.is_production() {
        let client_dir = &state.config.client_dir;
        tracing::info!("Serving client bundle from {}", client_dir.display());
        app = app.fallback_service(
            ServeDir::new(client_dir).fallback(ServeFile::new(client_dir.join("index.html"))),
        );
    }

    app.layer(cors_layer(&state.config))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Start the HTTP server and run until a shutdown signal.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));

    if state.generator.is_none() {
        tracing::warn!("API_KEY is not set; /api/generate will refuse requests");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "Server listening at http://{} ({} mode)",
        addr,
        state.config.mode.as_str()
    );

    serve_with_listener(listener, state, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_listener<F>(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.config.mode.as_str().to_string(),
        upstream_configured: state.generator.is_some(),
    })
}
