//! The relational persistent store contract.
//!
//! Backed by `rusqlite` with a bundled SQLite: a single
//! `Arc<Mutex<Connection>>`, with every query pushed onto a blocking thread
//! via `tokio::task::spawn_blocking` so callers never stall the async
//! runtime on file I/O. The on-disk `issue.md` / `issue_archived.md` files
//! remain the source of truth for issue state; this store only persists
//! user/usage/insight/billing rows.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::model::{Insights, PremiumState, UsagePeriod, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("reset already applied for topup {0}")]
    ResetAlreadyApplied(i64),
    #[error("background task join error: {0}")]
    Join(String),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalStats {
    pub total_users: u64,
    pub total_commits: u64,
    pub total_issues_opened: u64,
    pub total_images: u64,
}

/// A rusqlite-backed implementation of the persistent store contract.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                chat_id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                encrypted_remote_token BLOB NOT NULL,
                remote_repo_url TEXT NOT NULL DEFAULT '',
                committer_identity TEXT NOT NULL DEFAULT '',
                llm_provider TEXT,
                llm_endpoint TEXT,
                llm_auth_env TEXT,
                llm_model TEXT,
                custom_files TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS premium_state (
                chat_id INTEGER PRIMARY KEY,
                tier_level INTEGER NOT NULL DEFAULT 0,
                expiry_epoch INTEGER NOT NULL DEFAULT -1,
                subscription INTEGER NOT NULL DEFAULT 0,
                external_customer_id TEXT,
                external_subscription_id TEXT,
                billing_period TEXT
            );
            CREATE TABLE IF NOT EXISTS usage_period (
                chat_id INTEGER PRIMARY KEY,
                issues_created INTEGER NOT NULL DEFAULT 0,
                images_uploaded INTEGER NOT NULL DEFAULT 0,
                llm_input_tokens INTEGER NOT NULL DEFAULT 0,
                llm_output_tokens INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS insights (
                chat_id INTEGER PRIMARY KEY,
                commits INTEGER NOT NULL DEFAULT 0,
                issues_opened INTEGER NOT NULL DEFAULT 0,
                issues_closed INTEGER NOT NULL DEFAULT 0,
                issue_comments INTEGER NOT NULL DEFAULT 0,
                images INTEGER NOT NULL DEFAULT 0,
                sync_invocations INTEGER NOT NULL DEFAULT 0,
                insight_invocations INTEGER NOT NULL DEFAULT 0,
                reset_events INTEGER NOT NULL DEFAULT 0,
                lifetime_llm_tokens INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS topup_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                tier_name TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                external_event_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reset_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                topup_log_id INTEGER NOT NULL UNIQUE,
                issues_created INTEGER NOT NULL,
                images_uploaded INTEGER NOT NULL,
                llm_input_tokens INTEGER NOT NULL,
                llm_output_tokens INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub async fn get_or_create_user(
        &self,
        chat_id: i64,
        display_name: &str,
        initial_token: Vec<u8>,
    ) -> Result<User, StoreError> {
        let conn = self.conn.clone();
        let display_name = display_name.to_string();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            if let Some(user) = Self::read_user(&conn, chat_id)? {
                return Ok(user);
            }
            let now = Utc::now();
            conn.execute(
                "INSERT INTO users (chat_id, display_name, encrypted_remote_token, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![chat_id, display_name, initial_token, now.to_rfc3339()],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO premium_state (chat_id) VALUES (?1)",
                params![chat_id],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO usage_period (chat_id) VALUES (?1)",
                params![chat_id],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO insights (chat_id) VALUES (?1)",
                params![chat_id],
            )?;
            Self::read_user(&conn, chat_id)?.ok_or(StoreError::UserNotFound(chat_id))
        })
        .await
    }

    fn read_user(conn: &Connection, chat_id: i64) -> rusqlite::Result<Option<User>> {
        conn.query_row(
            "SELECT chat_id, display_name, encrypted_remote_token, remote_repo_url,
                    committer_identity, llm_provider, llm_endpoint, llm_auth_env, llm_model,
                    custom_files, created_at, updated_at
             FROM users WHERE chat_id = ?1",
            params![chat_id],
            |row| {
                let custom_files_raw: String = row.get(9)?;
                let created_at: String = row.get(10)?;
                let updated_at: String = row.get(11)?;
                Ok(User {
                    chat_id: row.get(0)?,
                    display_name: row.get(1)?,
                    encrypted_remote_token: row.get(2)?,
                    remote_repo_url: row.get(3)?,
                    committer_identity: row.get(4)?,
                    llm_provider: row.get(5)?,
                    llm_endpoint: row.get(6)?,
                    llm_auth_env: row.get(7)?,
                    llm_model: row.get(8)?,
                    custom_files: if custom_files_raw.is_empty() {
                        Vec::new()
                    } else {
                        custom_files_raw.split('\u{1f}').map(String::from).collect()
                    },
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()
    }

    pub async fn get_user(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            Self::read_user(&conn, chat_id).map_err(StoreError::from)
        })
        .await
    }

    pub async fn update_user_repo_url(&self, chat_id: i64, remote_repo_url: &str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let remote_repo_url = remote_repo_url.to_string();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET remote_repo_url = ?1, updated_at = ?2 WHERE chat_id = ?3",
                params![remote_repo_url, Utc::now().to_rfc3339(), chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_user_llm_config(
        &self,
        chat_id: i64,
        llm_provider: Option<&str>,
        llm_endpoint: Option<&str>,
        llm_auth_env: Option<&str>,
        llm_model: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let (llm_provider, llm_endpoint, llm_auth_env, llm_model) = (
            llm_provider.map(String::from),
            llm_endpoint.map(String::from),
            llm_auth_env.map(String::from),
            llm_model.map(String::from),
        );
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET llm_provider = ?1, llm_endpoint = ?2, llm_auth_env = ?3, llm_model = ?4,
                    updated_at = ?5 WHERE chat_id = ?6",
                params![llm_provider, llm_endpoint, llm_auth_env, llm_model, Utc::now().to_rfc3339(), chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_user_github_config(
        &self,
        chat_id: i64,
        remote_repo_url: &str,
        encrypted_remote_token: Vec<u8>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let remote_repo_url = remote_repo_url.to_string();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET remote_repo_url = ?1, encrypted_remote_token = ?2, updated_at = ?3
                 WHERE chat_id = ?4",
                params![remote_repo_url, encrypted_remote_token, Utc::now().to_rfc3339(), chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_user_committer(&self, chat_id: i64, committer_identity: &str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let committer_identity = committer_identity.to_string();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET committer_identity = ?1, updated_at = ?2 WHERE chat_id = ?3",
                params![committer_identity, Utc::now().to_rfc3339(), chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_user_custom_files(&self, chat_id: i64, files: Vec<String>) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET custom_files = ?1, updated_at = ?2 WHERE chat_id = ?3",
                params![files.join("\u{1f}"), Utc::now().to_rfc3339(), chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_premium_user(&self, chat_id: i64) -> Result<Option<PremiumState>, StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT chat_id, tier_level, expiry_epoch, subscription, external_customer_id,
                        external_subscription_id, billing_period
                 FROM premium_state WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(PremiumState {
                        chat_id: row.get(0)?,
                        tier_level: row.get(1)?,
                        expiry_epoch: row.get(2)?,
                        subscription: row.get::<_, i64>(3)? != 0,
                        external_customer_id: row.get(4)?,
                        external_subscription_id: row.get(5)?,
                        billing_period: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn create_premium_user(&self, state: PremiumState) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO premium_state (chat_id, tier_level, expiry_epoch, subscription,
                    external_customer_id, external_subscription_id, billing_period)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(chat_id) DO UPDATE SET
                    tier_level = excluded.tier_level,
                    expiry_epoch = excluded.expiry_epoch,
                    subscription = excluded.subscription,
                    external_customer_id = excluded.external_customer_id,
                    external_subscription_id = excluded.external_subscription_id,
                    billing_period = excluded.billing_period",
                params![
                    state.chat_id,
                    state.tier_level,
                    state.expiry_epoch,
                    state.subscription as i64,
                    state.external_customer_id,
                    state.external_subscription_id,
                    state.billing_period,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn create_topup_log(
        &self,
        chat_id: i64,
        tier_name: &str,
        amount_cents: i64,
        external_event_id: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.clone();
        let tier_name = tier_name.to_string();
        let external_event_id = external_event_id.to_string();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT OR IGNORE INTO topup_log (chat_id, tier_name, amount_cents, external_event_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![chat_id, tier_name, amount_cents, external_event_id, Utc::now().to_rfc3339()],
            )?;
            conn.query_row(
                "SELECT id FROM topup_log WHERE external_event_id = ?1",
                params![external_event_id],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
        .await
    }

    /// Idempotent per topup row.
    pub async fn reset_user_usage(&self, chat_id: i64, topup_log_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let already: Option<i64> = conn
                .query_row(
                    "SELECT id FROM reset_log WHERE topup_log_id = ?1",
                    params![topup_log_id],
                    |row| row.get(0),
                )
                .optional()?;
            if already.is_some() {
                return Err(StoreError::ResetAlreadyApplied(topup_log_id));
            }

            let usage = conn.query_row(
                "SELECT issues_created, images_uploaded, llm_input_tokens, llm_output_tokens
                 FROM usage_period WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(UsagePeriod {
                        issues_created: row.get(0)?,
                        images_uploaded: row.get(1)?,
                        llm_input_tokens: row.get(2)?,
                        llm_output_tokens: row.get(3)?,
                    })
                },
            )?;

            conn.execute(
                "INSERT INTO reset_log (chat_id, topup_log_id, issues_created, images_uploaded,
                    llm_input_tokens, llm_output_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chat_id,
                    topup_log_id,
                    usage.issues_created,
                    usage.images_uploaded,
                    usage.llm_input_tokens,
                    usage.llm_output_tokens,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            conn.execute(
                "UPDATE usage_period SET issues_created = 0, images_uploaded = 0,
                    llm_input_tokens = 0, llm_output_tokens = 0 WHERE chat_id = ?1",
                params![chat_id],
            )?;
            conn.execute(
                "UPDATE insights SET reset_events = reset_events + 1 WHERE chat_id = ?1",
                params![chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_user_usage(&self, chat_id: i64) -> Result<UsagePeriod, StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT issues_created, images_uploaded, llm_input_tokens, llm_output_tokens
                 FROM usage_period WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(UsagePeriod {
                        issues_created: row.get(0)?,
                        images_uploaded: row.get(1)?,
                        llm_input_tokens: row.get(2)?,
                        llm_output_tokens: row.get(3)?,
                    })
                },
            )
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn get_user_insights(&self, chat_id: i64) -> Result<Insights, StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT commits, issues_opened, issues_closed, issue_comments, images,
                        sync_invocations, insight_invocations, reset_events, lifetime_llm_tokens
                 FROM insights WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(Insights {
                        commits: row.get(0)?,
                        issues_opened: row.get(1)?,
                        issues_closed: row.get(2)?,
                        issue_comments: row.get(3)?,
                        images: row.get(4)?,
                        sync_invocations: row.get(5)?,
                        insight_invocations: row.get(6)?,
                        reset_events: row.get(7)?,
                        lifetime_llm_tokens: row.get(8)?,
                    })
                },
            )
            .map_err(StoreError::from)
        })
        .await
    }

    /// Compares the current period counter against `limit` without
    /// mutating anything.
    pub async fn check_usage_issue_limit(&self, chat_id: i64, limit: u32) -> Result<bool, StoreError> {
        let usage = self.get_user_usage(chat_id).await?;
        Ok(usage.issues_created < limit)
    }

    async fn bump_usage(&self, chat_id: i64, column: &'static str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let sql = format!("UPDATE usage_period SET {column} = {column} + 1 WHERE chat_id = ?1");
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(&sql, params![chat_id])?;
            Ok(())
        })
        .await
    }

    async fn bump_insight(&self, chat_id: i64, column: &'static str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let sql = format!("UPDATE insights SET {column} = {column} + 1 WHERE chat_id = ?1");
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(&sql, params![chat_id])?;
            Ok(())
        })
        .await
    }

    pub async fn increment_issue_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "issues_opened").await
    }
    pub async fn increment_usage_issue_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_usage(chat_id, "issues_created").await
    }
    pub async fn increment_image_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_usage(chat_id, "images_uploaded").await?;
        self.bump_insight(chat_id, "images").await
    }
    pub async fn increment_commit_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "commits").await
    }
    pub async fn increment_issue_comment_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "issue_comments").await
    }
    pub async fn increment_issue_close_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "issues_closed").await
    }
    pub async fn increment_sync_cmd_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "sync_invocations").await
    }
    pub async fn increment_insight_cmd_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "insight_invocations").await
    }
    pub async fn increment_reset_count(&self, chat_id: i64) -> Result<(), StoreError> {
        self.bump_insight(chat_id, "reset_events").await
    }

    /// Default-platform LLM usage increments both sinks.
    pub async fn increment_token_usage_all(&self, chat_id: i64, input: u64, output: u64) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE usage_period SET llm_input_tokens = llm_input_tokens + ?1,
                    llm_output_tokens = llm_output_tokens + ?2 WHERE chat_id = ?3",
                params![input as i64, output as i64, chat_id],
            )?;
            conn.execute(
                "UPDATE insights SET lifetime_llm_tokens = lifetime_llm_tokens + ?1 WHERE chat_id = ?2",
                params![(input + output) as i64, chat_id],
            )?;
            Ok(())
        })
        .await
    }

    /// User-supplied LLM: insights only, they pay their own provider.
    pub async fn increment_token_usage_insights(&self, chat_id: i64, total: u64) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE insights SET lifetime_llm_tokens = lifetime_llm_tokens + ?1 WHERE chat_id = ?2",
                params![total as i64, chat_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_global_stats(&self) -> Result<GlobalStats, StoreError> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let total_users: u64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            let total_commits: u64 =
                conn.query_row("SELECT COALESCE(SUM(commits), 0) FROM insights", [], |r| r.get(0))?;
            let total_issues_opened: u64 =
                conn.query_row("SELECT COALESCE(SUM(issues_opened), 0) FROM insights", [], |r| r.get(0))?;
            let total_images: u64 =
                conn.query_row("SELECT COALESCE(SUM(images), 0) FROM insights", [], |r| r.get(0))?;
            Ok(GlobalStats { total_users, total_commits, total_issues_opened, total_images })
        })
        .await
    }
}

async fn spawn_blocking<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_user_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.get_or_create_user(42, "alice", vec![1, 2, 3]).await.unwrap();
        let b = store.get_or_create_user(42, "ignored-second-name", vec![9]).await.unwrap();
        assert_eq!(a.chat_id, b.chat_id);
        assert_eq!(b.display_name, "alice");
    }

    #[tokio::test]
    async fn usage_increments_and_quota_check() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(1, "bob", vec![]).await.unwrap();

        assert!(store.check_usage_issue_limit(1, 2).await.unwrap());
        store.increment_usage_issue_count(1).await.unwrap();
        store.increment_usage_issue_count(1).await.unwrap();
        assert!(!store.check_usage_issue_limit(1, 2).await.unwrap());

        let usage = store.get_user_usage(1).await.unwrap();
        assert_eq!(usage.issues_created, 2);
    }

    #[tokio::test]
    async fn reset_is_idempotent_per_topup() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(1, "carol", vec![]).await.unwrap();
        store.increment_usage_issue_count(1).await.unwrap();

        let topup_id = store.create_topup_log(1, "coffee", 500, "evt_1").await.unwrap();
        store.reset_user_usage(1, topup_id).await.unwrap();
        let usage = store.get_user_usage(1).await.unwrap();
        assert_eq!(usage.issues_created, 0);

        let result = store.reset_user_usage(1, topup_id).await;
        assert!(matches!(result, Err(StoreError::ResetAlreadyApplied(_))));
    }

    #[tokio::test]
    async fn token_usage_sinks_differ_by_llm_source() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(1, "dave", vec![]).await.unwrap();

        store.increment_token_usage_all(1, 100, 50).await.unwrap();
        let usage = store.get_user_usage(1).await.unwrap();
        assert_eq!(usage.llm_input_tokens, 100);
        assert_eq!(usage.llm_output_tokens, 50);
        let insights = store.get_user_insights(1).await.unwrap();
        assert_eq!(insights.lifetime_llm_tokens, 150);

        store.increment_token_usage_insights(1, 30).await.unwrap();
        let usage_after = store.get_user_usage(1).await.unwrap();
        assert_eq!(usage_after.llm_input_tokens, 100, "user-supplied LLM must not touch usage sink");
        let insights_after = store.get_user_insights(1).await.unwrap();
        assert_eq!(insights_after.lifetime_llm_tokens, 180);
    }

    #[tokio::test]
    async fn get_user_reflects_repo_url_and_llm_config_updates() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(1, "eve", vec![]).await.unwrap();
        store.update_user_repo_url(1, "acme/x").await.unwrap();
        store.update_user_llm_config(1, Some("openai"), Some("https://api.openai.com"), Some("OPENAI_KEY"), Some("gpt-4")).await.unwrap();

        let user = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.remote_repo_url, "acme/x");
        assert_eq!(user.llm_provider.as_deref(), Some("openai"));
        assert!(!user.uses_platform_llm());

        assert!(store.get_user(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn global_stats_aggregate_across_users() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(1, "a", vec![]).await.unwrap();
        store.get_or_create_user(2, "b", vec![]).await.unwrap();
        store.increment_commit_count(1).await.unwrap();
        store.increment_commit_count(2).await.unwrap();

        let stats = store.get_global_stats().await.unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_commits, 2);
    }
}
