//! Stripe-style payment webhook: signature verification, payload decoding,
//! and dispatch into premium grant / subscription / refund / reset handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use bridge_core::model::{PremiumState, NEVER_EXPIRES};
use bridge_core::{BridgeError, SqliteStore};

use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Premium,
    Subscription,
    ResetUsage,
    Refund,
}

/// Decoded payment event. `event_id` is the provider's
/// delivery id, used as the idempotency key for resets
/// (`bridge_quota::apply_topup_reset`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentData {
    pub event_id: String,
    pub payment_type: PaymentType,
    pub user_id: i64,
    pub tier_name: String,
    pub premium_level: i32,
    pub amount: i64,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub billing_period: Option<String>,
    /// Future-plan change fields: logged even when the grant described here
    /// does not apply immediately.
    #[serde(default)]
    pub future_tier_name: Option<String>,
    #[serde(default)]
    pub future_premium_level: Option<i32>,
    #[serde(default)]
    pub future_effective_date: Option<String>,
}

pub async fn handle_stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let Some(signature) = headers.get("stripe-signature").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing signature").into_response();
    };

    if !verify_signature(&state.stripe_signing_secret, &body, signature) {
        tracing::warn!("payment webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let data: PaymentData = match serde_json::from_slice(&body) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode payment payload");
            return (StatusCode::BAD_REQUEST, "malformed payload").into_response();
        }
    };

    if data.future_tier_name.is_some() || data.future_premium_level.is_some() {
        tracing::info!(
            user_id = data.user_id,
            future_tier = ?data.future_tier_name,
            future_level = ?data.future_premium_level,
            effective = ?data.future_effective_date,
            "future plan change recorded"
        );
    }

    let result = match data.payment_type {
        PaymentType::Premium => grant_premium(&state.store, &data).await,
        PaymentType::Subscription => grant_subscription(&state.store, &data).await,
        PaymentType::Refund => apply_refund(&state.store, &data).await,
        PaymentType::ResetUsage => apply_reset(&state.store, &data).await,
    };

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, event_id = %data.event_id, "payment handler failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn grant_premium(store: &SqliteStore, data: &PaymentData) -> Result<(), BridgeError> {
    store
        .create_premium_user(PremiumState {
            chat_id: data.user_id,
            tier_level: data.premium_level,
            expiry_epoch: NEVER_EXPIRES,
            subscription: false,
            external_customer_id: None,
            external_subscription_id: None,
            billing_period: data.billing_period.clone(),
        })
        .await
        .map_err(store_err)
}

async fn grant_subscription(store: &SqliteStore, data: &PaymentData) -> Result<(), BridgeError> {
    store
        .create_premium_user(PremiumState {
            chat_id: data.user_id,
            tier_level: data.premium_level,
            expiry_epoch: NEVER_EXPIRES,
            subscription: true,
            external_customer_id: None,
            external_subscription_id: data.subscription_id.clone(),
            billing_period: data.billing_period.clone(),
        })
        .await
        .map_err(store_err)
}

/// A refund revokes premium immediately rather than waiting for period end.
async fn apply_refund(store: &SqliteStore, data: &PaymentData) -> Result<(), BridgeError> {
    store
        .create_premium_user(PremiumState::free(data.user_id))
        .await
        .map_err(store_err)
}

async fn apply_reset(store: &SqliteStore, data: &PaymentData) -> Result<(), BridgeError> {
    bridge_quota::apply_topup_reset(store, data.user_id, &data.tier_name, data.amount, &data.event_id).await
}

fn store_err(e: bridge_core::StoreError) -> BridgeError {
    BridgeError::Transient(e.to_string())
}

/// Verifies a `t=<unix ts>,v1=<hex hmac>` signature header against
/// `HMAC-SHA256("{t}.{body}", secret)`, the scheme this domain's payment
/// provider uses for webhook delivery.
fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let mut timestamp = None;
    let mut provided = None;
    for part in header.split(',') {
        if let Some(v) = part.strip_prefix("t=") {
            timestamp = Some(v);
        } else if let Some(v) = part.strip_prefix("v1=") {
            provided = Some(v);
        }
    }
    let (Some(timestamp), Some(provided)) = (timestamp, provided) else {
        return false;
    };
    let Some(tag) = hex_decode(provided) else {
        return false;
    };
    let signed_payload = [timestamp.as_bytes(), b".", payload].concat();
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    ring::hmac::verify(&key, &signed_payload, &tag).is_ok()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use bridge_integrations::github::oauth::{GitHubOAuthClient, GitHubOAuthConfig};
    use tower::ServiceExt;

    const SECRET: &str = "whsec_test";

    fn sign(payload: &[u8], timestamp: &str) -> String {
        let signed_payload = [timestamp.as_bytes(), b".", payload].concat();
        let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, SECRET.as_bytes());
        let tag = ring::hmac::sign(&key, &signed_payload);
        format!("t={timestamp},v1={}", hex_encode(tag.as_ref()))
    }

    fn test_state() -> Arc<AppState> {
        struct NullNotifier;
        #[async_trait::async_trait]
        impl crate::server::ChatNotifier for NullNotifier {
            async fn notify(&self, _chat_id: i64, _text: &str) {}
        }
        Arc::new(AppState {
            store: SqliteStore::open_in_memory().unwrap(),
            oauth: GitHubOAuthClient::new(GitHubOAuthConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                redirect_uri: "http://localhost/github/oauth".into(),
                scopes: vec!["repo".into()],
            }),
            encryption_key: bridge_core::crypto::EncryptionKey::generate().unwrap(),
            stripe_signing_secret: SECRET.into(),
            notifier: Arc::new(NullNotifier),
            invalidate_provider_cache: Arc::new(|_chat_id| {}),
        })
    }

    #[test]
    fn valid_signature_round_trips() {
        let payload = br#"{"hello":"world"}"#;
        let header = sign(payload, "1700000000");
        assert!(verify_signature(SECRET, payload, &header));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let header = sign(b"original", "1700000000");
        assert!(!verify_signature(SECRET, b"tampered", &header));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let payload = b"payload";
        let header = sign(payload, "1700000000");
        assert!(!verify_signature("different_secret", payload, &header));
    }

    #[test]
    fn malformed_header_fails_verification() {
        assert!(!verify_signature(SECRET, b"payload", "not-a-valid-header"));
    }

    #[tokio::test]
    async fn premium_event_grants_tier() {
        let state = test_state();
        state.store.get_or_create_user(42, "alice", vec![]).await.unwrap();
        let data = PaymentData {
            event_id: "evt_1".into(),
            payment_type: PaymentType::Premium,
            user_id: 42,
            tier_name: "coffee".into(),
            premium_level: 1,
            amount: 500,
            subscription_id: None,
            billing_period: None,
            future_tier_name: None,
            future_premium_level: None,
            future_effective_date: None,
        };
        grant_premium(&state.store, &data).await.unwrap();
        let premium = state.store.get_premium_user(42).await.unwrap().unwrap();
        assert_eq!(premium.tier_level, 1);
        assert!(!premium.subscription);
    }

    #[tokio::test]
    async fn refund_resets_to_free() {
        let state = test_state();
        state.store.get_or_create_user(42, "alice", vec![]).await.unwrap();
        state
            .store
            .create_premium_user(PremiumState {
                chat_id: 42,
                tier_level: 3,
                expiry_epoch: NEVER_EXPIRES,
                subscription: true,
                external_customer_id: None,
                external_subscription_id: Some("sub_1".into()),
                billing_period: None,
            })
            .await
            .unwrap();
        let data = PaymentData {
            event_id: "evt_2".into(),
            payment_type: PaymentType::Refund,
            user_id: 42,
            tier_name: "free".into(),
            premium_level: 0,
            amount: 0,
            subscription_id: None,
            billing_period: None,
            future_tier_name: None,
            future_premium_level: None,
            future_effective_date: None,
        };
        apply_refund(&state.store, &data).await.unwrap();
        let premium = state.store.get_premium_user(42).await.unwrap().unwrap();
        assert_eq!(premium.tier_level, 0);
        assert!(!premium.subscription);
    }

    #[tokio::test]
    async fn end_to_end_webhook_with_valid_signature_grants_premium() {
        let state = test_state();
        state.store.get_or_create_user(7, "bob", vec![]).await.unwrap();
        let body = serde_json::to_vec(&PaymentData {
            event_id: "evt_3".into(),
            payment_type: PaymentType::Premium,
            user_id: 7,
            tier_name: "coffee".into(),
            premium_level: 1,
            amount: 500,
            subscription_id: None,
            billing_period: None,
            future_tier_name: None,
            future_premium_level: None,
            future_effective_date: None,
        })
        .unwrap();
        let header = sign(&body, "1700000000");
        let app = crate::server::build_router(state.clone());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/stripe/webhook")
                    .header("stripe-signature", header)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let premium = state.store.get_premium_user(7).await.unwrap().unwrap();
        assert_eq!(premium.tier_level, 1);
    }

    #[tokio::test]
    async fn end_to_end_webhook_with_bad_signature_is_rejected() {
        let state = test_state();
        let app = crate::server::build_router(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/stripe/webhook")
                    .header("stripe-signature", "t=1,v1=deadbeef")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
