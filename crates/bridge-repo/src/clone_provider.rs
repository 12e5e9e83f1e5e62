//! Clone-based [`RepoProvider`]: a shallow local clone serves reads off the
//! working copy; writes land on disk then commit+push.
//!
//! Reads are native (`git2`, opened fresh per call — no long-lived handle to
//! go stale). Writes shell out to `git`, each invocation spawned onto its
//! own task the way a foreground command would be, so a slow push never
//! blocks the worker that owns this provider.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use bridge_core::model::{IssueIndexRow, IssueState};
use bridge_core::BridgeError;

use crate::api_provider::ApiRepoProvider;
use crate::provider::{CommitMode, FileReplacement, ProviderType, RepoInfo, RepoProvider, RepoSize};

/// Clone-based provider for one `(owner, repo)`. Issue operations and image
/// upload still go over the platform API — they have no on-disk
/// representation — so this wraps an [`ApiRepoProvider`] for those calls and
/// only overrides the file and size operations.
#[derive(Debug)]
pub struct CloneRepoProvider {
    local_path: PathBuf,
    clone_url: String,
    branch: String,
    base_repo_size_mb: f64,
    api_delegate: ApiRepoProvider,
}

impl CloneRepoProvider {
    /// `clone_url` must already carry the access token
    /// (`https://x-access-token:<token>@github.com/owner/repo.git`).
    pub fn new(
        local_path: PathBuf,
        clone_url: String,
        branch: String,
        base_repo_size_mb: f64,
        api_delegate: ApiRepoProvider,
    ) -> Self {
        Self { local_path, clone_url, branch, base_repo_size_mb, api_delegate }
    }

    /// Ensure a working copy exists at `local_path`, cloning shallowly if not.
    pub fn ensure_cloned(&self) -> Result<(), BridgeError> {
        if self.local_path.join(".git").exists() {
            return Ok(());
        }
        if let Some(parent) = self.local_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BridgeError::Transient(e.to_string()))?;
        }
        let mut opts = git2::FetchOptions::new();
        opts.depth(1);
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(opts).branch(&self.branch);
        builder
            .clone(&self.clone_url, &self.local_path)
            .map_err(|e| BridgeError::Transient(e.message().to_string()))?;
        Ok(())
    }

    fn open(&self) -> Result<git2::Repository, BridgeError> {
        git2::Repository::discover(&self.local_path).map_err(|e| BridgeError::Transient(e.message().to_string()))
    }

    /// The repo's current default branch as checked out locally, mirroring
    /// the read-native pattern the file reads use.
    pub fn current_branch(&self) -> Result<String, BridgeError> {
        let repo = self.open()?;
        let head = repo.head().map_err(|e| BridgeError::Transient(e.message().to_string()))?;
        Ok(head.shorthand().unwrap_or(&self.branch).to_string())
    }

    async fn run_git(&self, args: &[&str]) -> Result<(), BridgeError> {
        let workdir = self.local_path.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = tokio::spawn(async move { Command::new("git").args(&args).current_dir(&workdir).output().await })
            .await
            .map_err(|e| BridgeError::Transient(e.to_string()))?
            .map_err(|e| BridgeError::Transient(e.to_string()))?;
        if !output.status.success() {
            return Err(BridgeError::Transient(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    async fn commit_and_push(&self, paths: &[&str], message: &str) -> Result<(), BridgeError> {
        let mut add_args = vec!["add"];
        add_args.extend_from_slice(paths);
        self.run_git(&add_args).await?;
        self.run_git(&["commit", "-m", message]).await?;
        self.run_git(&["push", "origin", self.branch.as_str()]).await
    }

    fn write_local(&self, path: &str, content: &str) -> Result<(), BridgeError> {
        let full = self.local_path.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BridgeError::Transient(e.to_string()))?;
        }
        std::fs::write(&full, content).map_err(|e| BridgeError::Transient(e.to_string()))
    }

    fn read_local(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.local_path.join(path)).ok()
    }
}

fn dir_size_bytes(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else { return 0 };
    let mut total = 0u64;
    for entry in entries.flatten() {
        let p = entry.path();
        if p.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if meta.is_dir() {
                total += dir_size_bytes(&p);
            } else {
                total += meta.len();
            }
        }
    }
    total
}

#[async_trait]
impl RepoProvider for CloneRepoProvider {
    async fn read_file(&self, path: &str) -> Result<Option<String>, BridgeError> {
        self.ensure_cloned()?;
        Ok(self.read_local(path))
    }

    async fn commit_file(&self, path: &str, content: &str, mode: CommitMode, message: &str) -> Result<(), BridgeError> {
        self.ensure_cloned()?;
        let existing = self.read_local(path).unwrap_or_default();
        let merged = match mode {
            CommitMode::Prepend => format!("{content}{existing}"),
            CommitMode::Append => format!("{existing}{content}"),
        };
        self.write_local(path, &merged)?;
        self.commit_and_push(&[path], message).await
    }

    async fn replace_file(&self, path: &str, content: &str, message: &str) -> Result<(), BridgeError> {
        self.ensure_cloned()?;
        self.write_local(path, content)?;
        self.commit_and_push(&[path], message).await
    }

    async fn replace_multiple_files(&self, files: &[FileReplacement], message: &str) -> Result<(), BridgeError> {
        self.ensure_cloned()?;
        for f in files {
            self.write_local(&f.path, &f.contents)?;
        }
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        self.commit_and_push(&paths, message).await
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueIndexRow, BridgeError> {
        self.api_delegate.create_issue(title, body).await
    }

    async fn close_issue(&self, number: u64) -> Result<(), BridgeError> {
        self.api_delegate.close_issue(number).await
    }

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<(), BridgeError> {
        self.api_delegate.add_issue_comment(number, body).await
    }

    async fn sync_issue_statuses(&self, numbers: &[u64]) -> Result<Vec<(u64, IssueState)>, BridgeError> {
        self.api_delegate.sync_issue_statuses(numbers).await
    }

    async fn upload_image_to_cdn(&self, filename: &str, bytes: &[u8]) -> Result<String, BridgeError> {
        self.api_delegate.upload_image_to_cdn(filename, bytes).await
    }

    async fn get_repo_size(&self) -> Result<RepoSize, BridgeError> {
        self.ensure_cloned()?;
        let bytes = dir_size_bytes(&self.local_path);
        let size_mb = bytes as f64 / (1024.0 * 1024.0);
        let percentage = (size_mb / self.base_repo_size_mb) * 100.0;
        Ok(RepoSize { size_mb, percentage })
    }

    async fn get_file_url(&self, path: &str) -> Result<String, BridgeError> {
        self.api_delegate.get_file_url(path).await
    }

    async fn get_repo_info(&self) -> Result<RepoInfo, BridgeError> {
        self.api_delegate.get_repo_info().await
    }

    fn needs_clone(&self) -> bool {
        true
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_size_sums_files_and_skips_dotgit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("index"), "xxxxxxxxxx").unwrap();
        assert_eq!(dir_size_bytes(dir.path()), 5);
    }

    #[test]
    fn clone_provider_reports_clone_source_label() {
        assert_eq!(ProviderType::Clone.size_source_label(), "(Actual cloned size)");
    }
}
