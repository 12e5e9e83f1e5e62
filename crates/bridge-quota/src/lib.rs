//! Quota, tier, and usage accounting.

pub mod accounting;
pub mod tiers;

pub use accounting::{
    apply_topup_reset, check_issue_create_admission, check_write_admission, record_token_usage,
    ISSUE_NEAR_CAPACITY_PCT, WRITE_NEAR_CAPACITY_PCT,
};
pub use tiers::{limits_for_tier, TierLimits};
