//! The remote-repository provider abstraction: the `RepoProvider`
//! capability set, its API-based and clone-based implementations, the
//! process-wide file lock manager, and the issue sync/archive pipeline.

pub mod api_provider;
pub mod clone_provider;
pub mod lock;
pub mod provider;
pub mod sync;

pub use api_provider::ApiRepoProvider;
pub use clone_provider::CloneRepoProvider;
pub use lock::FileLockManager;
pub use provider::{CommitMode, FileReplacement, ProviderType, RepoInfo, RepoProvider, RepoSize};
pub use sync::{run_issue_sync, SyncSummary};
