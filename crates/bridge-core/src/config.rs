use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.config/bridge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tiers: TierLimitsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub pending: PendingConfig,
}

impl Config {
    /// Load config from `~/.config/bridge/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject configurations that would make the admission model nonsensical.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.global_rate_per_sec == 0 {
            return Err(ConfigError::Invalid("rate_limit.global_rate_per_sec must be > 0".into()));
        }
        if self.rate_limit.content_workers == 0 || self.rate_limit.callback_workers == 0 {
            return Err(ConfigError::Invalid("worker counts must be > 0".into()));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("bridge")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_project_name() -> String {
    "chat-repo-bridge".into()
}
fn default_log_level() -> String {
    "info".into()
}

/// Webhook HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    #[serde(default = "default_max_concurrent_ops")]
    pub max_concurrent_ops: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            webhook_port: default_webhook_port(),
            max_concurrent_ops: default_max_concurrent_ops(),
        }
    }
}

fn default_webhook_port() -> u16 {
    8080
}
fn default_max_concurrent_ops() -> usize {
    64
}

/// Ingress admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_rate")]
    pub global_rate_per_sec: u32,
    #[serde(default = "default_global_burst")]
    pub global_burst: u32,
    #[serde(default = "default_user_rate")]
    pub per_user_rate_per_sec: u32,
    #[serde(default = "default_user_burst")]
    pub per_user_burst: u32,
    #[serde(default = "default_content_workers")]
    pub content_workers: usize,
    #[serde(default = "default_callback_workers")]
    pub callback_workers: usize,
    #[serde(default = "default_content_queue_cap")]
    pub content_queue_capacity: usize,
    #[serde(default = "default_callback_queue_cap")]
    pub callback_queue_capacity: usize,
    #[serde(default = "default_dedup_capacity")]
    pub callback_dedup_capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rate_per_sec: default_global_rate(),
            global_burst: default_global_burst(),
            per_user_rate_per_sec: default_user_rate(),
            per_user_burst: default_user_burst(),
            content_workers: default_content_workers(),
            callback_workers: default_callback_workers(),
            content_queue_capacity: default_content_queue_cap(),
            callback_queue_capacity: default_callback_queue_cap(),
            callback_dedup_capacity: default_dedup_capacity(),
        }
    }
}

fn default_global_rate() -> u32 {
    5000
}
fn default_global_burst() -> u32 {
    5000
}
fn default_user_rate() -> u32 {
    30
}
fn default_user_burst() -> u32 {
    30
}
fn default_content_workers() -> usize {
    8
}
fn default_callback_workers() -> usize {
    4
}
fn default_content_queue_cap() -> usize {
    1024
}
fn default_callback_queue_cap() -> usize {
    512
}
fn default_dedup_capacity() -> usize {
    4096
}

/// Free-tier base values; other tiers scale these by their multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimitsConfig {
    #[serde(default = "default_base_repo_size_mb")]
    pub base_repo_size_mb: u64,
    #[serde(default = "default_base_images")]
    pub base_images_per_period: u32,
    #[serde(default = "default_base_issues")]
    pub base_issues_per_period: u32,
    #[serde(default = "default_base_tokens")]
    pub base_tokens_per_period: u64,
    #[serde(default = "default_base_custom_files")]
    pub base_custom_files: usize,
}

impl Default for TierLimitsConfig {
    fn default() -> Self {
        Self {
            base_repo_size_mb: default_base_repo_size_mb(),
            base_images_per_period: default_base_images(),
            base_issues_per_period: default_base_issues(),
            base_tokens_per_period: default_base_tokens(),
            base_custom_files: default_base_custom_files(),
        }
    }
}

fn default_base_repo_size_mb() -> u64 {
    100
}
fn default_base_images() -> u32 {
    20
}
fn default_base_issues() -> u32 {
    10
}
fn default_base_tokens() -> u64 {
    50_000
}
fn default_base_custom_files() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_github_oauth_client_id_env")]
    pub github_oauth_client_id_env: String,
    #[serde(default = "default_github_oauth_client_secret_env")]
    pub github_oauth_client_secret_env: String,
    #[serde(default = "default_stripe_signing_secret_env")]
    pub stripe_signing_secret_env: String,
    #[serde(default = "default_token_encryption_key_env")]
    pub token_encryption_key_env: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            github_oauth_client_id_env: default_github_oauth_client_id_env(),
            github_oauth_client_secret_env: default_github_oauth_client_secret_env(),
            stripe_signing_secret_env: default_stripe_signing_secret_env(),
            token_encryption_key_env: default_token_encryption_key_env(),
        }
    }
}

fn default_github_oauth_client_id_env() -> String {
    "GITHUB_OAUTH_CLIENT_ID".into()
}
fn default_github_oauth_client_secret_env() -> String {
    "GITHUB_OAUTH_CLIENT_SECRET".into()
}
fn default_stripe_signing_secret_env() -> String {
    "STRIPE_WEBHOOK_SECRET".into()
}
fn default_token_encryption_key_env() -> String {
    "BRIDGE_TOKEN_KEY".into()
}

/// Pending-interaction store eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfig {
    #[serde(default = "default_pending_ttl_mins")]
    pub ttl_minutes: u64,
    #[serde(default = "default_pending_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_pending_ttl_mins(),
            sweep_interval_secs: default_pending_sweep_secs(),
        }
    }
}

fn default_pending_ttl_mins() -> u64 {
    30
}
fn default_pending_sweep_secs() -> u64 {
    60
}
