//! HTTP relay server.
//!
//! ## Endpoints
//! - `POST /api/generate` - stream a task's NDJSON events from the upstream model
//! - `GET /api/health` - liveness and configuration summary
//!
//! In production mode every other path serves the pre-built client bundle.

mod error;
mod rate_limit;
mod relay;
mod routes;
pub mod types;

pub use error::ApiError;
pub use rate_limit::{Decision, RateLimiter};
pub use relay::STREAM_CONTENT_TYPE;
pub use routes::{router, serve, serve_with_listener, AppState};
