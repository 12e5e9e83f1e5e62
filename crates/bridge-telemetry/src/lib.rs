//! Logging and request-correlation infrastructure for bridge services.
//!
//! Structured logging via `tracing`/`tracing-subscriber`, plus an axum
//! middleware that stamps every webhook request with a correlation id.

pub mod logging;
pub mod tracing_setup;

pub use logging::{init_logging, init_logging_json};
pub use tracing_setup::request_id_middleware;
