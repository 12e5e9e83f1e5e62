//! Wires every `bridge-*` crate into a single running process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use bridge_core::config::Config;
use bridge_core::crypto::EncryptionKey;
use bridge_core::SqliteStore;
use bridge_dispatch::{IngressConfig, IngressPool, PendingStore};
use bridge_harness::dedup::CallbackDedup;
use bridge_harness::rate_limiter::{IngressLimiter, RateLimitConfig};
use bridge_harness::shutdown::ShutdownSignal;
use bridge_integrations::github::oauth::{GitHubOAuthClient, GitHubOAuthConfig};
use bridge_repo::FileLockManager;
use bridge_webhook::{build_router, AppState, ChatNotifier};

use crate::error::DaemonError;
use crate::handlers::{callback_handler, content_handler, HandlerContext};
use crate::providers::ProviderCache;

/// Logs rather than delivers, until a concrete chat-platform adapter is
/// wired in — the chat SDK itself is out of scope.
struct NullNotifier;

#[async_trait]
impl ChatNotifier for NullNotifier {
    async fn notify(&self, chat_id: i64, text: &str) {
        tracing::info!(chat_id, text, "chat notification dropped: no transport wired");
    }
}

pub struct Daemon {
    store: SqliteStore,
    locks: Arc<FileLockManager>,
    pending: Arc<PendingStore>,
    ingress: IngressPool,
    webhook_state: Arc<AppState>,
    handler_ctx: Arc<HandlerContext>,
    shutdown: ShutdownSignal,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self, DaemonError> {
        let db_path = data_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = SqliteStore::open(db_path)?;

        let encryption_key = load_encryption_key(&config.providers.token_encryption_key_env)?;

        let oauth = GitHubOAuthClient::new(GitHubOAuthConfig {
            client_id: std::env::var(&config.providers.github_oauth_client_id_env).unwrap_or_default(),
            client_secret: std::env::var(&config.providers.github_oauth_client_secret_env).unwrap_or_default(),
            redirect_uri: format!("http://localhost:{}/github/oauth", config.server.webhook_port),
            scopes: vec!["repo".into()],
        });
        let stripe_signing_secret =
            std::env::var(&config.providers.stripe_signing_secret_env).unwrap_or_default();

        let locks = Arc::new(FileLockManager::default());
        let pending = Arc::new(PendingStore::new(Duration::from_secs(config.pending.ttl_minutes * 60)));

        let limiter = Arc::new(IngressLimiter::new(
            RateLimitConfig::new(config.rate_limit.global_rate_per_sec as f64, config.rate_limit.global_burst as f64),
            RateLimitConfig::new(config.rate_limit.per_user_rate_per_sec as f64, config.rate_limit.per_user_burst as f64),
        ));
        let dedup = Arc::new(CallbackDedup::new(config.rate_limit.callback_dedup_capacity));
        let ingress = IngressPool::new(
            limiter,
            dedup,
            IngressConfig {
                content_workers: config.rate_limit.content_workers,
                callback_workers: config.rate_limit.callback_workers,
                content_queue_cap: config.rate_limit.content_queue_capacity,
                callback_queue_cap: config.rate_limit.callback_queue_capacity,
                max_concurrent_ops: config.server.max_concurrent_ops,
            },
        );

        let notifier: Arc<dyn ChatNotifier> = Arc::new(NullNotifier);
        let providers = ProviderCache::new(store.clone(), encryption_key.clone(), config.tiers.base_repo_size_mb as f64);

        let invalidate = {
            let providers = providers.clone();
            Arc::new(move |chat_id: i64| providers.invalidate(chat_id))
        };

        let webhook_state = Arc::new(AppState {
            store: store.clone(),
            oauth,
            encryption_key,
            stripe_signing_secret,
            notifier: notifier.clone(),
            invalidate_provider_cache: invalidate,
        });

        let handler_ctx = Arc::new(HandlerContext {
            store: store.clone(),
            locks: locks.clone(),
            pending: pending.clone(),
            providers,
            notifier,
            tier_base: config.tiers.clone(),
        });

        Ok(Self {
            store,
            locks,
            pending,
            ingress,
            webhook_state,
            handler_ctx,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn locks(&self) -> &Arc<FileLockManager> {
        &self.locks
    }

    pub fn pending(&self) -> &Arc<PendingStore> {
        &self.pending
    }

    /// Starts the ingress worker pool and the webhook HTTP server, and runs
    /// until the bound listener's server future returns (on `ShutdownSignal`
    /// trigger) and the ingress pool has drained.
    pub async fn run(mut self, webhook_listener: TcpListener) -> Result<(), DaemonError> {
        self.ingress.start(content_handler(self.handler_ctx.clone()), callback_handler(self.handler_ctx.clone()))?;

        let router = build_router(self.webhook_state.clone());
        let mut shutdown_rx = self.shutdown.subscribe();
        let server = axum::serve(webhook_listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        });

        tracing::info!("daemon running");
        server.await.map_err(|e| DaemonError::Server(e.to_string()))?;

        self.ingress.stop(Duration::from_secs(10)).await;
        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Hard errors when unset: a freshly generated key each boot would make
/// every `encrypted_remote_token` row already on disk undecryptable, which
/// is worse than refusing to start.
fn load_encryption_key(env_var: &str) -> Result<EncryptionKey, DaemonError> {
    let raw = std::env::var(env_var)
        .map_err(|_| DaemonError::Crypto(format!("{env_var} is not set; refusing to start with an ephemeral key")))?;
    let decoded = base64_decode(&raw).map_err(DaemonError::Crypto)?;
    EncryptionKey::from_bytes(&decoded).map_err(|e| DaemonError::Crypto(e.to_string()))
}

/// Minimal base64 decode so the key material never needs a dedicated
/// configuration file: `BRIDGE_TOKEN_KEY` carries a standard-alphabet,
/// padded, 32-byte key.
fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s.trim()).map_err(|e| format!("invalid base64 in key: {e}"))
}

fn data_db_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("BRIDGE_DB_PATH") {
        return std::path::PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("bridge")
        .join("bridge.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_wires_every_crate_with_default_config() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let dir = std::env::temp_dir().join(format!("bridge-daemon-test-{}", std::process::id()));
        std::env::set_var("BRIDGE_DB_PATH", dir.join("bridge.db"));
        std::env::set_var("BRIDGE_TOKEN_KEY", STANDARD.encode([3u8; 32]));
        let config = Config {
            server: bridge_core::config::ServerConfig { webhook_port: 0, ..Default::default() },
            ..Default::default()
        };
        let daemon = Daemon::new(config).await.unwrap();
        assert!(!daemon.shutdown_handle().is_shutting_down());
    }

    #[tokio::test]
    async fn new_fails_without_encryption_key() {
        std::env::remove_var("BRIDGE_TOKEN_KEY");
        let config = Config {
            server: bridge_core::config::ServerConfig { webhook_port: 0, ..Default::default() },
            providers: bridge_core::config::ProvidersConfig {
                token_encryption_key_env: "BRIDGE_TOKEN_KEY_UNSET_FOR_TEST".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(Daemon::new(config).await.is_err());
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert!(base64_decode("not base64!!").is_err());
    }

    #[test]
    fn base64_decode_accepts_32_byte_key() {
        let key = [7u8; 32];
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let encoded = STANDARD.encode(key);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, key.to_vec());
    }
}
