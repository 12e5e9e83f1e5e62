//! The GitHub OAuth callback route.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect};
use serde::Deserialize;

use bridge_core::crypto::encrypt_token;
use bridge_integrations::github::oauth::parse_telegram_state;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct OAuthQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn handle_oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OAuthQuery>,
) -> impl IntoResponse {
    if let Some(err) = query.error {
        tracing::info!(error = %err, "user cancelled or denied the github oauth grant");
        return Redirect::to("/auth-cancel");
    }

    let Some(code) = query.code else {
        return Redirect::to("/auth-error?error=missing_code");
    };

    // Reject any state shape that isn't ours before the token endpoint is
    // ever touched.
    let Some((chat_id, _user_id)) = query.state.as_deref().and_then(parse_telegram_state) else {
        return Redirect::to("/auth-error?error=invalid_state");
    };

    let token = match state.oauth.exchange_code(&code).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, chat_id, "github code exchange failed");
            return Redirect::to("/auth-error?error=exchange_failed");
        }
    };

    let profile = match state.oauth.get_user(&token.access_token).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, chat_id, "failed to fetch github profile after exchange");
            return Redirect::to("/auth-error?error=profile_fetch_failed");
        }
    };

    let encrypted = match encrypt_token(&state.encryption_key, &token.access_token) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = ?e, chat_id, "failed to encrypt github token");
            return Redirect::to("/auth-error?error=internal");
        }
    };

    let existing = match state.store.get_or_create_user(chat_id, &profile.login, Vec::new()).await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(error = %e, chat_id, "failed to load user row during oauth callback");
            return Redirect::to("/auth-error?error=internal");
        }
    };

    if let Err(e) = state
        .store
        .update_user_github_config(chat_id, &existing.remote_repo_url, encrypted)
        .await
    {
        tracing::error!(error = %e, chat_id, "failed to persist github token");
        return Redirect::to("/auth-error?error=internal");
    }

    // The token write must invalidate whatever provider is cached for this
    // user atomically with the write.
    (state.invalidate_provider_cache)(chat_id);

    state
        .notifier
        .notify(chat_id, &format!("✅ Connected GitHub account: {}", profile.login))
        .await;

    Redirect::to("/auth-success")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bridge_integrations::github::oauth::{GitHubOAuthClient, GitHubOAuthConfig};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        struct NullNotifier;
        #[async_trait::async_trait]
        impl crate::server::ChatNotifier for NullNotifier {
            async fn notify(&self, _chat_id: i64, _text: &str) {}
        }
        Arc::new(AppState {
            store: bridge_core::SqliteStore::open_in_memory().unwrap(),
            oauth: GitHubOAuthClient::new(GitHubOAuthConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                redirect_uri: "http://localhost/github/oauth".into(),
                scopes: vec!["repo".into()],
            }),
            encryption_key: bridge_core::crypto::EncryptionKey::generate().unwrap(),
            stripe_signing_secret: "whsec_test".into(),
            notifier: Arc::new(NullNotifier),
            invalidate_provider_cache: Arc::new(|_chat_id| {}),
        })
    }

    fn redirect_location(resp: &axum::response::Response) -> String {
        resp.headers()
            .get(axum::http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn invalid_state_shape_redirects_without_network_call() {
        let app = crate::server::build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/github/oauth?state=not_telegram_x&code=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(redirect_location(&resp), "/auth-error?error=invalid_state");
    }

    #[tokio::test]
    async fn missing_state_redirects_to_invalid_state() {
        let app = crate::server::build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/github/oauth?code=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(redirect_location(&resp), "/auth-error?error=invalid_state");
    }

    #[tokio::test]
    async fn user_denial_redirects_to_auth_cancel() {
        let app = crate::server::build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/github/oauth?error=access_denied&state=telegram_42_99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(redirect_location(&resp), "/auth-cancel");
    }

    #[tokio::test]
    async fn missing_code_redirects_to_missing_code() {
        let app = crate::server::build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/github/oauth?state=telegram_42_99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(redirect_location(&resp), "/auth-error?error=missing_code");
    }
}
