//! Issue Sync & Archive Pipeline, triggered by the `sync`
//! command: move closed issues out of `issue.md` into `issue_archived.md` in
//! one atomic commit, without disturbing rows whose remote state hasn't
//! caught up to the local file's emoji yet.

use std::time::Duration;

use bridge_core::markdown::{format_issue_index_line, parse_issue_index};
use bridge_core::model::{IssueIndexRow, IssueState, ISSUE_ARCHIVE_FILENAME};
use bridge_core::BridgeError;

use crate::lock::FileLockManager;
use crate::provider::{FileReplacement, RepoProvider};

const ISSUE_FILE: &str = "issue.md";
/// GraphQL batching ceiling.
const STATUS_BATCH_SIZE: usize = 100;
/// Lock acquisition ceiling for the sync pipeline.
const LOCK_CEILING: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSummary {
    pub archived_count: usize,
}

/// Run the full 7-step protocol for one user's repository.
pub async fn run_issue_sync(
    provider: &dyn RepoProvider,
    locks: &FileLockManager,
    user_id: i64,
    repo_url: &str,
) -> Result<SyncSummary, BridgeError> {
    // Step 1: acquire both locks up front so the whole pipeline runs under
    // exclusive ownership of both files.
    let issue_lock = locks.acquire_file_lock(user_id, repo_url, ISSUE_FILE, LOCK_CEILING).await?;
    let archive_lock = locks.acquire_file_lock(user_id, repo_url, ISSUE_ARCHIVE_FILENAME, LOCK_CEILING).await?;

    // Step 2: read and parse.
    let issue_md = provider.read_file(ISSUE_FILE).await?.unwrap_or_default();
    let rows = parse_issue_index(&issue_md);

    // Step 3: partition on the row's state AS RECORDED IN THE FILE, not on
    // anything fetched later — a row that later turns out closed stays
    // active this cycle.
    let mut active: Vec<IssueIndexRow> = rows.iter().filter(|r| r.state == IssueState::Open).cloned().collect();
    let mut archivable: Vec<IssueIndexRow> = rows.into_iter().filter(|r| r.state == IssueState::Closed).collect();
    active.sort_by(|a, b| b.number.cmp(&a.number));
    archivable.sort_by(|a, b| b.number.cmp(&a.number));

    // Step 4: batch-fetch current status for the active set, paging above
    // the per-request ceiling.
    let mut statuses = std::collections::HashMap::new();
    for chunk in active.chunks(STATUS_BATCH_SIZE) {
        let numbers: Vec<u64> = chunk.iter().map(|r| r.number).collect();
        for (number, state) in provider.sync_issue_statuses(&numbers).await? {
            statuses.insert(number, state);
        }
    }

    // Step 5: rebuild issue.md, updating each active row's emoji from the
    // fetched status but keeping it in the active file regardless.
    for row in &mut active {
        if let Some(state) = statuses.get(&row.number) {
            row.state = *state;
        }
    }
    let new_issue_md = active.iter().map(format_issue_index_line).collect::<Vec<_>>().join("\n");
    let new_issue_md = if new_issue_md.is_empty() { new_issue_md } else { format!("{new_issue_md}\n") };

    let archived_count = archivable.len();
    let message = format!("sync: archived {archived_count} issues");

    if archivable.is_empty() {
        // Edge case: no closed issues — single-file commit only.
        provider.replace_file(ISSUE_FILE, &new_issue_md, &message).await?;
    } else {
        // Step 6: prepend archivable rows to issue_archived.md.
        let existing_archive = provider.read_file(ISSUE_ARCHIVE_FILENAME).await?.unwrap_or_default();
        let prepend = archivable.iter().map(format_issue_index_line).collect::<Vec<_>>().join("\n");
        let new_archive = format!("{prepend}\n{existing_archive}");

        // Step 7: one atomic commit for both files.
        provider
            .replace_multiple_files(
                &[
                    FileReplacement { path: ISSUE_FILE.to_string(), contents: new_issue_md },
                    FileReplacement { path: ISSUE_ARCHIVE_FILENAME.to_string(), contents: new_archive },
                ],
                &message,
            )
            .await?;
    }

    issue_lock.release();
    archive_lock.release();

    Ok(SyncSummary { archived_count })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use bridge_core::model::{IssueIndexRow, IssueState};

    use super::*;
    use crate::provider::{CommitMode, ProviderType, RepoInfo, RepoSize};

    /// An in-memory provider that serves fixed file contents and fixed
    /// remote statuses, recording every write for assertions.
    #[derive(Debug)]
    struct FakeProvider {
        files: Mutex<std::collections::HashMap<String, String>>,
        remote_statuses: std::collections::HashMap<u64, IssueState>,
        multi_file_commits: Mutex<Vec<(Vec<FileReplacement>, String)>>,
    }

    #[async_trait]
    impl RepoProvider for FakeProvider {
        async fn read_file(&self, path: &str) -> Result<Option<String>, BridgeError> {
            Ok(self.files.lock().unwrap().get(path).cloned())
        }
        async fn commit_file(&self, _: &str, _: &str, _: CommitMode, _: &str) -> Result<(), BridgeError> {
            unreachable!("sync pipeline only replaces, never prepends")
        }
        async fn replace_file(&self, path: &str, content: &str, _message: &str) -> Result<(), BridgeError> {
            self.files.lock().unwrap().insert(path.to_string(), content.to_string());
            Ok(())
        }
        async fn replace_multiple_files(&self, files: &[FileReplacement], message: &str) -> Result<(), BridgeError> {
            for f in files {
                self.files.lock().unwrap().insert(f.path.clone(), f.contents.clone());
            }
            self.multi_file_commits.lock().unwrap().push((files.to_vec(), message.to_string()));
            Ok(())
        }
        async fn create_issue(&self, _: &str, _: &str) -> Result<IssueIndexRow, BridgeError> {
            unreachable!()
        }
        async fn close_issue(&self, _: u64) -> Result<(), BridgeError> {
            unreachable!()
        }
        async fn add_issue_comment(&self, _: u64, _: &str) -> Result<(), BridgeError> {
            unreachable!()
        }
        async fn sync_issue_statuses(&self, numbers: &[u64]) -> Result<Vec<(u64, IssueState)>, BridgeError> {
            Ok(numbers.iter().filter_map(|n| self.remote_statuses.get(n).map(|s| (*n, *s))).collect())
        }
        async fn upload_image_to_cdn(&self, _: &str, _: &[u8]) -> Result<String, BridgeError> {
            unreachable!()
        }
        async fn get_repo_size(&self) -> Result<RepoSize, BridgeError> {
            unreachable!()
        }
        async fn get_file_url(&self, _: &str) -> Result<String, BridgeError> {
            unreachable!()
        }
        async fn get_repo_info(&self) -> Result<RepoInfo, BridgeError> {
            unreachable!()
        }
        fn needs_clone(&self) -> bool {
            false
        }
        fn provider_type(&self) -> ProviderType {
            ProviderType::Api
        }
    }

    #[tokio::test]
    async fn sync_with_three_open_two_closed() {
        // Three open, two already closed upstream.
        let issue_md = "\
- 🟢 acme/x#10 [A]
- 🟢 acme/x#8 [B]
- 🟢 acme/x#5 [C]
- 🔴 acme/x#4 [D]
- 🔴 acme/x#2 [E]
";
        let mut files = std::collections::HashMap::new();
        files.insert(ISSUE_FILE.to_string(), issue_md.to_string());
        let provider = FakeProvider {
            files: Mutex::new(files),
            remote_statuses: [(10, IssueState::Open), (8, IssueState::Closed), (5, IssueState::Open)].into(),
            multi_file_commits: Mutex::new(Vec::new()),
        };
        let locks = FileLockManager::new();

        let summary = run_issue_sync(&provider, &locks, 1, "acme/x").await.unwrap();
        assert_eq!(summary.archived_count, 2);

        let new_issue_md = provider.files.lock().unwrap().get(ISSUE_FILE).cloned().unwrap();
        assert_eq!(new_issue_md, "- 🟢 acme/x#10 [A]\n- 🔴 acme/x#8 [B]\n- 🟢 acme/x#5 [C]\n");

        let archive = provider.files.lock().unwrap().get(ISSUE_ARCHIVE_FILENAME).cloned().unwrap();
        assert!(archive.starts_with("- 🔴 acme/x#4 [D]\n- 🔴 acme/x#2 [E]\n"));

        let commits = provider.multi_file_commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].1.contains("archived 2 issues"));
    }

    #[tokio::test]
    async fn no_closed_issues_writes_single_file_only() {
        let issue_md = "- 🟢 acme/x#1 [A]\n";
        let mut files = std::collections::HashMap::new();
        files.insert(ISSUE_FILE.to_string(), issue_md.to_string());
        let provider = FakeProvider {
            files: Mutex::new(files),
            remote_statuses: [(1, IssueState::Open)].into(),
            multi_file_commits: Mutex::new(Vec::new()),
        };
        let locks = FileLockManager::new();

        let summary = run_issue_sync(&provider, &locks, 1, "acme/x").await.unwrap();
        assert_eq!(summary.archived_count, 0);
        assert!(provider.multi_file_commits.lock().unwrap().is_empty());
        assert!(provider.files.lock().unwrap().get(ISSUE_ARCHIVE_FILENAME).is_none());
    }

    #[tokio::test]
    async fn issue_closed_remotely_stays_active_until_next_sync() {
        let issue_md = "- 🟢 acme/x#1 [A]\n";
        let mut files = std::collections::HashMap::new();
        files.insert(ISSUE_FILE.to_string(), issue_md.to_string());
        let provider = FakeProvider {
            files: Mutex::new(files),
            remote_statuses: [(1, IssueState::Closed)].into(),
            multi_file_commits: Mutex::new(Vec::new()),
        };
        let locks = FileLockManager::new();

        let summary = run_issue_sync(&provider, &locks, 1, "acme/x").await.unwrap();
        assert_eq!(summary.archived_count, 0);

        let new_issue_md = provider.files.lock().unwrap().get(ISSUE_FILE).cloned().unwrap();
        assert_eq!(new_issue_md, "- 🔴 acme/x#1 [A]\n");
        assert!(provider.files.lock().unwrap().get(ISSUE_ARCHIVE_FILENAME).is_none());
    }

    #[tokio::test]
    async fn ignores_non_matching_lines_in_issue_md() {
        let issue_md = "# Header\n- 🟢 acme/x#1 [A]\nnot a bullet\n";
        let mut files = std::collections::HashMap::new();
        files.insert(ISSUE_FILE.to_string(), issue_md.to_string());
        let provider = FakeProvider {
            files: Mutex::new(files),
            remote_statuses: [(1, IssueState::Open)].into(),
            multi_file_commits: Mutex::new(Vec::new()),
        };
        let locks = FileLockManager::new();

        let summary = run_issue_sync(&provider, &locks, 1, "acme/x").await.unwrap();
        assert_eq!(summary.archived_count, 0);
        let new_issue_md = provider.files.lock().unwrap().get(ISSUE_FILE).cloned().unwrap();
        assert_eq!(new_issue_md, "- 🟢 acme/x#1 [A]\n");
    }
}
