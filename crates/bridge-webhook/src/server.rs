//! Router wiring for the webhook receiver. `WEBHOOK_PORT` selects the bound port; see
//! `bridge_core::config::ServerConfig`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;

use bridge_core::crypto::EncryptionKey;
use bridge_core::SqliteStore;
use bridge_integrations::github::oauth::GitHubOAuthClient;

use crate::{oauth_callback, payment};

/// Delivers an out-of-band message to the chat the user started from
///. The
/// daemon binds this to whichever chat platform adapter it runs; the
/// webhook crate never depends on a specific chat transport.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn notify(&self, chat_id: i64, text: &str);
}

/// Shared state behind every webhook route.
pub struct AppState {
    pub store: SqliteStore,
    pub oauth: GitHubOAuthClient,
    pub encryption_key: EncryptionKey,
    pub stripe_signing_secret: String,
    pub notifier: Arc<dyn ChatNotifier>,
    /// Invalidates whatever repo provider is cached for a user, called the
    /// moment their token changes.
    pub invalidate_provider_cache: Arc<dyn Fn(i64) + Send + Sync>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stripe/webhook", post(payment::handle_stripe_webhook))
        .route("/github/oauth", get(oauth_callback::handle_oauth_callback))
        .route("/health", get(health))
        .route("/", get(root))
        .layer(axum::middleware::from_fn(bridge_telemetry::request_id_middleware))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn root() -> &'static str {
    "chat-repo-bridge webhook receiver"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bridge_integrations::github::oauth::GitHubOAuthConfig;
    use tower::ServiceExt;

    struct NullNotifier;

    #[async_trait]
    impl ChatNotifier for NullNotifier {
        async fn notify(&self, _chat_id: i64, _text: &str) {}
    }

    pub(crate) fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            store: SqliteStore::open_in_memory().unwrap(),
            oauth: GitHubOAuthClient::new(GitHubOAuthConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                redirect_uri: "http://localhost/github/oauth".into(),
                scopes: vec!["repo".into()],
            }),
            encryption_key: EncryptionKey::generate().unwrap(),
            stripe_signing_secret: "whsec_test".into(),
            notifier: Arc::new(NullNotifier),
            invalidate_provider_cache: Arc::new(|_chat_id| {}),
        })
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn root_is_informational() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
