//! Atomic multi-file commits via the Git Data API. `octocrab` has no
//! tree/blob/commit helpers, so this talks to the REST API directly with
//! `reqwest`, reusing the same bearer token as [`super::client::GitHubClient`].

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GitHub API error ({status}): {body}")]
    Api { status: u16, body: String },
}

type Result<T> = std::result::Result<T, CommitError>;

/// One file to write as part of an atomic commit.
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

#[derive(Deserialize)]
struct RefObject {
    object: RefObjectSha,
}

#[derive(Deserialize)]
struct RefObjectSha {
    sha: String,
}

#[derive(Deserialize)]
struct CommitObject {
    tree: TreeSha,
}

#[derive(Deserialize)]
struct TreeSha {
    sha: String,
}

#[derive(Serialize)]
struct CreateBlob<'a> {
    content: &'a str,
    encoding: &'static str,
}

#[derive(Deserialize)]
struct BlobResponse {
    sha: String,
}

#[derive(Serialize)]
struct TreeEntry {
    path: String,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: String,
}

#[derive(Serialize)]
struct CreateTree {
    base_tree: String,
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeResponse {
    sha: String,
}

#[derive(Serialize)]
struct CreateCommit<'a> {
    message: &'a str,
    tree: String,
    parents: Vec<String>,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Serialize)]
struct UpdateRef {
    sha: String,
    force: bool,
}

/// Write `files` to `branch` in a single commit. Reads the branch head,
/// creates one blob per file, builds a tree on top of the current tree,
/// creates a commit, and fast-forwards the branch ref.
pub async fn atomic_multi_file_commit(
    http: &Client,
    token: &str,
    owner: &str,
    repo: &str,
    branch: &str,
    files: &[FileWrite],
    message: &str,
) -> Result<String> {
    let base = format!("https://api.github.com/repos/{owner}/{repo}");

    let head: RefObject = get(http, token, &format!("{base}/git/ref/heads/{branch}")).await?;
    let head_commit_sha = head.object.sha;

    let head_commit: CommitObject = get(http, token, &format!("{base}/git/commits/{head_commit_sha}")).await?;
    let base_tree_sha = head_commit.tree.sha;

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let blob: BlobResponse = post(
            http,
            token,
            &format!("{base}/git/blobs"),
            &CreateBlob { content: &file.content, encoding: "utf-8" },
        )
        .await?;
        entries.push(TreeEntry { path: file.path.clone(), mode: "100644", kind: "blob", sha: blob.sha });
    }

    let tree: TreeResponse = post(
        http,
        token,
        &format!("{base}/git/trees"),
        &CreateTree { base_tree: base_tree_sha, tree: entries },
    )
    .await?;

    let commit: CommitResponse = post(
        http,
        token,
        &format!("{base}/git/commits"),
        &CreateCommit { message, tree: tree.sha, parents: vec![head_commit_sha] },
    )
    .await?;

    let _: serde_json::Value = patch(
        http,
        token,
        &format!("{base}/git/refs/heads/{branch}"),
        &UpdateRef { sha: commit.sha.clone(), force: false },
    )
    .await?;

    Ok(commit.sha)
}

async fn get<T: for<'de> Deserialize<'de>>(http: &Client, token: &str, url: &str) -> Result<T> {
    let resp = http
        .get(url)
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "chat-repo-bridge/1.0")
        .send()
        .await?;
    parse_response(resp).await
}

async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(http: &Client, token: &str, url: &str, body: &B) -> Result<T> {
    let resp = http
        .post(url)
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "chat-repo-bridge/1.0")
        .json(body)
        .send()
        .await?;
    parse_response(resp).await
}

async fn patch<B: Serialize, T: for<'de> Deserialize<'de>>(http: &Client, token: &str, url: &str, body: &B) -> Result<T> {
    let resp = http
        .patch(url)
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "chat-repo-bridge/1.0")
        .json(body)
        .send()
        .await?;
    parse_response(resp).await
}

async fn parse_response<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(CommitError::Api { status: status.as_u16(), body });
    }
    serde_json::from_str(&body).map_err(|e| CommitError::Api { status: status.as_u16(), body: format!("{e}: {body}") })
}
