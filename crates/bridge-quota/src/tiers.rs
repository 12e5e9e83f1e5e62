//! Tier-scaled limits. All limits scale from a
//! free-tier base by the tier's multiplier.

use bridge_core::config::TierLimitsConfig;
use bridge_core::model::Tier;

#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub repo_size_mb: u64,
    pub images_per_period: u32,
    pub issues_per_period: u32,
    pub tokens_per_period: u64,
    pub custom_files: usize,
}

/// Scale `base` by `tier`'s multiplier.
pub fn limits_for_tier(base: &TierLimitsConfig, tier: Tier) -> TierLimits {
    let m = tier.multiplier();
    TierLimits {
        repo_size_mb: base.base_repo_size_mb * m,
        images_per_period: base.base_images_per_period * m as u32,
        issues_per_period: base.base_issues_per_period * m as u32,
        tokens_per_period: base.base_tokens_per_period * m,
        custom_files: base.base_custom_files * m as usize,
    }
}
