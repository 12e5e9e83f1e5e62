//! Process-wiring errors — distinct from `bridge_core::BridgeError`, which
//! is what handlers return up to the dispatcher.

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] bridge_core::config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] bridge_core::StoreError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ingress error: {0}")]
    Ingress(#[from] bridge_dispatch::IngressError),

    #[error("server error: {0}")]
    Server(String),
}
