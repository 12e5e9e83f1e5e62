//! The `RepoProvider` abstraction.
//!
//! Callers dispatch through this capability set and never branch on the
//! underlying tag (API-based vs clone-based) except to report the size
//! source label back to the user.

use async_trait::async_trait;

use bridge_core::model::IssueIndexRow;
use bridge_core::BridgeError;

/// Whether a commit inserts before existing content or appends after it.
/// TODOs, notes, and new issue-index rows all use `Prepend` — state
/// transitions on an existing row (a TODO's done flag, an issue closing)
/// go through `RepoProvider::replace_file`/`replace_multiple_files`
/// instead, never `Append`, or duplicate entries would accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Prepend,
    Append,
}

/// One file's new full contents, for [`RepoProvider::replace_multiple_files`].
#[derive(Debug, Clone)]
pub struct FileReplacement {
    pub path: String,
    pub contents: String,
}

/// Where a repo's size came from, reported verbatim alongside the
/// percentage so the user can tell an API estimate from a clone measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Api,
    Clone,
}

impl ProviderType {
    pub fn size_source_label(&self) -> &'static str {
        match self {
            ProviderType::Api => "(GitHub API)",
            ProviderType::Clone => "(Actual cloned size)",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepoSize {
    pub size_mb: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
    pub default_branch: String,
}

/// Capability set a repo backend must implement.
///
/// A `RepoProvider` is scoped to one user's repository; the dispatcher holds
/// a provider cache keyed by `chat_id` and never passes a provider across
/// users.
#[async_trait]
pub trait RepoProvider: Send + Sync + std::fmt::Debug {
    async fn read_file(&self, path: &str) -> Result<Option<String>, BridgeError>;

    /// Append or prepend `content` to the file at `path`, creating it if it
    /// does not exist. `message` becomes the commit message.
    async fn commit_file(
        &self,
        path: &str,
        content: &str,
        mode: CommitMode,
        message: &str,
    ) -> Result<(), BridgeError>;

    /// Overwrite `path` with `content` wholesale (e.g. custom-file init).
    async fn replace_file(&self, path: &str, content: &str, message: &str) -> Result<(), BridgeError>;

    /// Atomically replace several files in one commit.
    async fn replace_multiple_files(
        &self,
        files: &[FileReplacement],
        message: &str,
    ) -> Result<(), BridgeError>;

    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueIndexRow, BridgeError>;

    async fn close_issue(&self, number: u64) -> Result<(), BridgeError>;

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<(), BridgeError>;

    /// Batch-fetch current open/closed status for the given issue numbers
    /// in as few remote calls as the backend allows.
    async fn sync_issue_statuses(
        &self,
        numbers: &[u64],
    ) -> Result<Vec<(u64, bridge_core::model::IssueState)>, BridgeError>;

    async fn upload_image_to_cdn(&self, filename: &str, bytes: &[u8]) -> Result<String, BridgeError>;

    async fn get_repo_size(&self) -> Result<RepoSize, BridgeError>;

    async fn get_file_url(&self, path: &str) -> Result<String, BridgeError>;

    async fn get_repo_info(&self) -> Result<RepoInfo, BridgeError>;

    /// Whether this backend requires a local working copy before it can
    /// serve reads (clone-based providers do; API-based providers never do).
    fn needs_clone(&self) -> bool;

    fn provider_type(&self) -> ProviderType;
}
