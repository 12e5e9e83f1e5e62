//! Per-user [`RepoProvider`] cache.
//!
//! One GitHub-backed provider per `chat_id`, built from the user's stored,
//! encrypted token. Built lazily on first use and invalidated whenever the
//! user's token or repo changes (OAuth re-auth, `/repo`).

use std::sync::Arc;

use dashmap::DashMap;

use bridge_core::crypto::{decrypt_token, EncryptionKey};
use bridge_core::model::User;
use bridge_core::{BridgeError, SqliteStore};
use bridge_integrations::github::client::{split_owner_repo, GitHubClient};
use bridge_repo::{ApiRepoProvider, RepoProvider};

/// Commits target the repo's default branch; the daemon never offers a way
/// to target anything else.
const WORKING_BRANCH: &str = "main";

pub struct ProviderCache {
    store: SqliteStore,
    encryption_key: EncryptionKey,
    base_repo_size_mb: f64,
    cache: DashMap<i64, Arc<dyn RepoProvider>>,
}

impl ProviderCache {
    pub fn new(store: SqliteStore, encryption_key: EncryptionKey, base_repo_size_mb: f64) -> Arc<Self> {
        Arc::new(Self { store, encryption_key, base_repo_size_mb, cache: DashMap::new() })
    }

    /// Drop whatever is cached for `chat_id` so the next `get` rebuilds from
    /// the current stored token/repo.
    pub fn invalidate(&self, chat_id: i64) {
        self.cache.remove(&chat_id);
    }

    pub async fn get(&self, chat_id: i64) -> Result<Arc<dyn RepoProvider>, BridgeError> {
        if let Some(existing) = self.cache.get(&chat_id) {
            return Ok(existing.clone());
        }

        let user = self
            .store
            .get_user(chat_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| BridgeError::NotFound(format!("no user row for chat {chat_id}")))?;

        let provider = self.build(&user)?;
        self.cache.insert(chat_id, provider.clone());
        Ok(provider)
    }

    fn build(&self, user: &User) -> Result<Arc<dyn RepoProvider>, BridgeError> {
        if user.remote_repo_url.is_empty() {
            return Err(BridgeError::Validation("no repository configured yet; send /repo <owner/repo>".into()));
        }
        let token = decrypt_token(&self.encryption_key, &user.encrypted_remote_token)
            .map_err(|e| BridgeError::AuthFailed(e.to_string()))?;
        let (owner, repo) = split_owner_repo(&user.remote_repo_url)
            .ok_or_else(|| BridgeError::Validation(format!("malformed repo url: {}", user.remote_repo_url)))?;
        let client = GitHubClient::new(&token).map_err(|e| BridgeError::AuthFailed(e.to_string()))?;
        Ok(Arc::new(ApiRepoProvider::new(
            client,
            token,
            owner.to_string(),
            repo.to_string(),
            WORKING_BRANCH.to_string(),
            self.base_repo_size_mb,
        )))
    }
}

fn store_err(e: bridge_core::StoreError) -> BridgeError {
    BridgeError::Transient(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_fails_cleanly_when_repo_not_yet_configured() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user(1, "alice", vec![1, 2, 3]).await.unwrap();
        let key = EncryptionKey::generate().unwrap();
        let cache = ProviderCache::new(store, key, 100.0);
        let err = cache.get(1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[tokio::test]
    async fn get_fails_for_unknown_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = EncryptionKey::generate().unwrap();
        let cache = ProviderCache::new(store, key, 100.0);
        assert!(matches!(cache.get(999).await, Err(BridgeError::NotFound(_))));
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild_from_current_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = EncryptionKey::generate().unwrap();
        let token = bridge_core::crypto::encrypt_token(&key, "gho_token").unwrap();
        store.get_or_create_user(1, "alice", token).await.unwrap();
        store.update_user_repo_url(1, "acme/widgets").await.unwrap();
        let cache = ProviderCache::new(store.clone(), key, 100.0);

        let first = cache.get(1).await.unwrap();
        assert_eq!(first.provider_type(), bridge_repo::ProviderType::Api);
        cache.invalidate(1);
        assert!(cache.cache.is_empty());
    }
}
