//! Admission checks and counters for quota/tier accounting.

use bridge_core::model::Tier;
use bridge_core::{BridgeError, SqliteStore};

use crate::tiers::{limits_for_tier, TierLimits};

/// Near-capacity threshold for ordinary writes (commits, image uploads).
pub const WRITE_NEAR_CAPACITY_PCT: f64 = 97.0;
/// Near-capacity threshold that blocks issue creation outright.
pub const ISSUE_NEAR_CAPACITY_PCT: f64 = 100.0;

fn next_tier_limit(tier: Tier, base: &bridge_core::config::TierLimitsConfig, pick: impl Fn(&TierLimits) -> u64) -> u64 {
    match tier.next() {
        Some(next) => pick(&limits_for_tier(base, next)),
        None => pick(&limits_for_tier(base, tier)),
    }
}

/// Consult both the period counter and the repo-size check before creating
/// an issue. Either failure
/// aborts with a tier-aware message naming the next tier's limit.
pub async fn check_issue_create_admission(
    store: &SqliteStore,
    chat_id: i64,
    tier: Tier,
    base: &bridge_core::config::TierLimitsConfig,
    repo_size_percentage: f64,
) -> Result<(), BridgeError> {
    if repo_size_percentage >= ISSUE_NEAR_CAPACITY_PCT {
        return Err(BridgeError::NearCapacity { percentage: repo_size_percentage });
    }
    let limits = limits_for_tier(base, tier);
    let usage = store.get_user_usage(chat_id).await.map_err(store_error_to_bridge)?;
    if usage.issues_created >= limits.issues_per_period {
        let next_limit = next_tier_limit(tier, base, |l| l.issues_per_period as u64);
        return Err(BridgeError::QuotaExceeded {
            used: usage.issues_created as u64,
            limit: limits.issues_per_period as u64,
            next_tier_limit: next_limit,
        });
    }
    Ok(())
}

/// Consult the ≥97% near-capacity rule before an ordinary write.
pub fn check_write_admission(repo_size_percentage: f64) -> Result<(), BridgeError> {
    if repo_size_percentage >= WRITE_NEAR_CAPACITY_PCT {
        return Err(BridgeError::NearCapacity { percentage: repo_size_percentage });
    }
    Ok(())
}

/// Record LLM token usage into the correct sink(s).
pub async fn record_token_usage(
    store: &SqliteStore,
    chat_id: i64,
    uses_platform_llm: bool,
    input_tokens: u64,
    output_tokens: u64,
) -> Result<(), BridgeError> {
    if uses_platform_llm {
        store.increment_token_usage_all(chat_id, input_tokens, output_tokens).await.map_err(store_error_to_bridge)
    } else {
        store
            .increment_token_usage_insights(chat_id, input_tokens + output_tokens)
            .await
            .map_err(store_error_to_bridge)
    }
}

/// Apply a paid-event usage reset: idempotent per topup row.
pub async fn apply_topup_reset(
    store: &SqliteStore,
    chat_id: i64,
    tier_name: &str,
    amount_cents: i64,
    external_event_id: &str,
) -> Result<(), BridgeError> {
    let topup_log_id = store
        .create_topup_log(chat_id, tier_name, amount_cents, external_event_id)
        .await
        .map_err(store_error_to_bridge)?;
    match store.reset_user_usage(chat_id, topup_log_id).await {
        Ok(()) => store.increment_reset_count(chat_id).await.map_err(store_error_to_bridge),
        Err(bridge_core::StoreError::ResetAlreadyApplied(_)) => Ok(()),
        Err(e) => Err(store_error_to_bridge(e)),
    }
}

fn store_error_to_bridge(e: bridge_core::StoreError) -> BridgeError {
    BridgeError::Transient(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(42, "alice", vec![1, 2, 3]).await.unwrap();
        store
    }

    #[tokio::test]
    async fn issue_create_admission_blocks_at_repo_capacity() {
        let store = seeded_store().await;
        let base = bridge_core::config::TierLimitsConfig::default();
        let result = check_issue_create_admission(&store, 42, Tier::Free, &base, 100.0).await;
        assert!(matches!(result, Err(BridgeError::NearCapacity { .. })));
    }

    #[tokio::test]
    async fn issue_create_admission_blocks_at_period_limit_with_next_tier_hint() {
        let store = seeded_store().await;
        let mut base = bridge_core::config::TierLimitsConfig::default();
        base.base_issues_per_period = 1;
        for _ in 0..1 {
            store.increment_issue_count(42).await.unwrap();
            store.increment_usage_issue_count(42).await.unwrap();
        }
        let result = check_issue_create_admission(&store, 42, Tier::Free, &base, 10.0).await;
        match result {
            Err(BridgeError::QuotaExceeded { used, limit, next_tier_limit }) => {
                assert_eq!(used, 1);
                assert_eq!(limit, 1);
                assert_eq!(next_tier_limit, 2); // Coffee tier multiplies by 2
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[test]
    fn write_admission_blocks_at_97_percent() {
        assert!(check_write_admission(96.9).is_ok());
        assert!(matches!(check_write_admission(97.0), Err(BridgeError::NearCapacity { .. })));
    }

    #[tokio::test]
    async fn platform_llm_increments_both_sinks() {
        let store = seeded_store().await;
        record_token_usage(&store, 42, true, 10, 20).await.unwrap();
        let usage = store.get_user_usage(42).await.unwrap();
        let insights = store.get_user_insights(42).await.unwrap();
        assert_eq!(usage.llm_input_tokens, 10);
        assert_eq!(usage.llm_output_tokens, 20);
        assert_eq!(insights.lifetime_llm_tokens, 30);
    }

    #[tokio::test]
    async fn byo_llm_increments_insights_only() {
        let store = seeded_store().await;
        record_token_usage(&store, 42, false, 10, 20).await.unwrap();
        let usage = store.get_user_usage(42).await.unwrap();
        let insights = store.get_user_insights(42).await.unwrap();
        assert_eq!(usage.llm_input_tokens, 0);
        assert_eq!(insights.lifetime_llm_tokens, 30);
    }

    #[tokio::test]
    async fn topup_reset_is_idempotent_when_replayed() {
        let store = seeded_store().await;
        store.increment_commit_count(42).await.unwrap();
        apply_topup_reset(&store, 42, "coffee", 500, "evt-1").await.unwrap();
        // A replayed webhook delivery for the same external event must not
        // double-count the reset.
        apply_topup_reset(&store, 42, "coffee", 500, "evt-1").await.unwrap();
        let insights = store.get_user_insights(42).await.unwrap();
        assert_eq!(insights.reset_events, 1);
    }
}
