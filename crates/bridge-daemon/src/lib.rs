//! Process entry point: config load, crate wiring, graceful shutdown.

pub mod daemon;
pub mod error;
pub mod handlers;
pub mod providers;

pub use daemon::Daemon;
pub use error::DaemonError;
