//! API-based [`RepoProvider`]: every read and write goes over the GitHub
//! REST/Git Data API, no local working copy.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use bridge_core::model::{IssueIndexRow, IssueState};
use bridge_core::BridgeError;
use bridge_harness::circuit_breaker::retry_once_if_transient;
use bridge_integrations::github::client::GitHubClient;
use bridge_integrations::github::commit::{atomic_multi_file_commit, FileWrite};
use bridge_integrations::github::issues;

use crate::provider::{CommitMode, FileReplacement, ProviderType, RepoInfo, RepoProvider, RepoSize};

/// API-based provider for one `(owner, repo)` scoped to one user's token.
#[derive(Debug)]
pub struct ApiRepoProvider {
    client: GitHubClient,
    http: Client,
    token: String,
    owner: String,
    repo: String,
    branch: String,
    base_repo_size_mb: f64,
    /// The repository's default branch, fetched once from metadata and
    /// cached for the provider's lifetime — `self.branch` is the working
    /// branch commits target, which may legitimately differ.
    default_branch: OnceCell<String>,
}

impl ApiRepoProvider {
    pub fn new(client: GitHubClient, token: String, owner: String, repo: String, branch: String, base_repo_size_mb: f64) -> Self {
        let http = Client::builder()
            .user_agent("chat-repo-bridge/1.0")
            .build()
            .expect("failed to build reqwest client");
        Self { client, http, token, owner, repo, branch, base_repo_size_mb, default_branch: OnceCell::new() }
    }

    fn commit(&self, path: &str, content: String, message: &str) -> impl std::future::Future<Output = Result<(), BridgeError>> + '_ {
        let files = vec![FileWrite { path: path.to_string(), content }];
        let message = message.to_string();
        async move {
            atomic_multi_file_commit(&self.http, &self.token, &self.owner, &self.repo, &self.branch, &files, &message)
                .await
                .map(|_| ())
                .map_err(to_bridge_error)
        }
    }

    async fn fetch_repo_meta(&self) -> Result<RepoMeta, BridgeError> {
        retry_once_if_transient(|| async {
            let url = format!("https://api.github.com/repos/{}/{}", self.owner, self.repo);
            let resp = self
                .http
                .get(&url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "chat-repo-bridge/1.0")
                .send()
                .await
                .map_err(|e| BridgeError::Transient(e.to_string()))?;
            resp.json::<RepoMeta>().await.map_err(|e| BridgeError::Transient(e.to_string()))
        })
        .await
    }

    /// The repository's default branch per its metadata, cached after the
    /// first successful fetch.
    async fn default_branch(&self) -> Result<&str, BridgeError> {
        self.default_branch
            .get_or_try_init(|| async {
                let meta = self.fetch_repo_meta().await?;
                Ok(meta.default_branch.unwrap_or_else(|| self.branch.clone()))
            })
            .await
            .map(String::as_str)
    }
}

fn to_bridge_error(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Transient(e.to_string())
}

#[derive(Deserialize)]
struct ContentsPutResponse {
    content: ContentsPutContent,
}

#[derive(Deserialize)]
struct ContentsPutContent {
    download_url: Option<String>,
}

#[derive(Serialize)]
struct ContentsPutRequest<'a> {
    message: &'a str,
    content: &'a str,
    branch: &'a str,
}

#[derive(Deserialize)]
struct RepoMeta {
    size: Option<i64>,
    default_branch: Option<String>,
}

#[async_trait]
impl RepoProvider for ApiRepoProvider {
    async fn read_file(&self, path: &str) -> Result<Option<String>, BridgeError> {
        retry_once_if_transient(|| async {
            match self.client.inner().repos(&self.owner, &self.repo).get_content().path(path).r#ref(&self.branch).send().await {
                Ok(mut items) => {
                    let Some(item) = items.items.pop() else { return Ok(None) };
                    Ok(item.decoded_content())
                }
                Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => Ok(None),
                Err(e) => Err(to_bridge_error(e)),
            }
        })
        .await
    }

    async fn commit_file(&self, path: &str, content: &str, mode: CommitMode, message: &str) -> Result<(), BridgeError> {
        let existing = self.read_file(path).await?.unwrap_or_default();
        let merged = match mode {
            CommitMode::Prepend => format!("{content}{existing}"),
            CommitMode::Append => format!("{existing}{content}"),
        };
        self.commit(path, merged, message).await
    }

    async fn replace_file(&self, path: &str, content: &str, message: &str) -> Result<(), BridgeError> {
        self.commit(path, content.to_string(), message).await
    }

    async fn replace_multiple_files(&self, files: &[FileReplacement], message: &str) -> Result<(), BridgeError> {
        let writes: Vec<FileWrite> = files
            .iter()
            .map(|f| FileWrite { path: f.path.clone(), content: f.contents.clone() })
            .collect();
        atomic_multi_file_commit(&self.http, &self.token, &self.owner, &self.repo, &self.branch, &writes, message)
            .await
            .map(|_| ())
            .map_err(to_bridge_error)
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueIndexRow, BridgeError> {
        let issue = issues::create_issue(&self.client, &self.owner, &self.repo, title, body)
            .await
            .map_err(to_bridge_error)?;
        Ok(issue.to_index_row(&self.owner, &self.repo))
    }

    async fn close_issue(&self, number: u64) -> Result<(), BridgeError> {
        issues::close_issue(&self.client, &self.owner, &self.repo, number).await.map_err(to_bridge_error)?;
        Ok(())
    }

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<(), BridgeError> {
        issues::comment_on_issue(&self.client, &self.owner, &self.repo, number, body).await.map_err(to_bridge_error)
    }

    async fn sync_issue_statuses(&self, numbers: &[u64]) -> Result<Vec<(u64, IssueState)>, BridgeError> {
        // octocrab has no batch-by-number endpoint; list once and filter, which
        // keeps this to a single remote call per sync.
        retry_once_if_transient(|| async {
            let all = issues::list_issues(&self.client, &self.owner, &self.repo, None).await.map_err(to_bridge_error)?;
            let wanted: std::collections::HashSet<u64> = numbers.iter().copied().collect();
            Ok(all.into_iter().filter(|i| wanted.contains(&i.number)).map(|i| (i.number, i.state)).collect())
        })
        .await
    }

    async fn upload_image_to_cdn(&self, filename: &str, bytes: &[u8]) -> Result<String, BridgeError> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let url = format!("https://api.github.com/repos/{}/{}/contents/images/{filename}", self.owner, self.repo);
        let body = ContentsPutRequest { message: &format!("upload image {filename}"), content: &encoded, branch: &self.branch };
        let resp = self
            .http
            .put(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "chat-repo-bridge/1.0")
            .json(&body)
            .send()
            .await
            .map_err(to_bridge_error)?;
        if !resp.status().is_success() {
            return Err(BridgeError::Transient(format!("image upload failed: {}", resp.status())));
        }
        let parsed: ContentsPutResponse = resp.json().await.map_err(to_bridge_error)?;
        parsed
            .content
            .download_url
            .ok_or_else(|| BridgeError::Transient("GitHub did not return a download URL".into()))
    }

    async fn get_repo_size(&self) -> Result<RepoSize, BridgeError> {
        let meta = self.fetch_repo_meta().await?;
        let size_mb = meta.size.unwrap_or(0) as f64 / 1024.0;
        let percentage = (size_mb / self.base_repo_size_mb) * 100.0;
        Ok(RepoSize { size_mb, percentage })
    }

    async fn get_file_url(&self, path: &str) -> Result<String, BridgeError> {
        let default_branch = self.default_branch().await?;
        Ok(format!("https://github.com/{}/{}/blob/{default_branch}/{path}", self.owner, self.repo))
    }

    async fn get_repo_info(&self) -> Result<RepoInfo, BridgeError> {
        let default_branch = self.default_branch().await?.to_string();
        Ok(RepoInfo { owner: self.owner.clone(), repo: self.repo.clone(), default_branch })
    }

    fn needs_clone(&self) -> bool {
        false
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Api
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_source_label_identifies_api_backend() {
        assert_eq!(ProviderType::Api.size_source_label(), "(GitHub API)");
    }

    #[test]
    fn percentage_scales_with_base_repo_size() {
        let size_mb = 50.0_f64;
        let base = 100.0_f64;
        assert_eq!((size_mb / base) * 100.0, 50.0);
    }
}
