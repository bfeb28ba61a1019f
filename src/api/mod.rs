//! HTTP API: streamed chat answers, health and metrics

pub mod handlers;
pub mod models;
pub mod routes;

pub use handlers::{status_for, AppState};
pub use models::{ApiError, ChatRequest, HealthResponse, ModelSpec};
pub use routes::build_router;
