//! A GitHub API client bound to a single user's decrypted token.
//!
//! One `GitHubClient` is built per call since every user
//! authenticates against their own remote repository; `owner`/`repo` are
//! supplied per call rather than fixed at construction, because a single
//! process serves many users' repositories concurrently.

use octocrab::Octocrab;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GitHubError>;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    pub(crate) octocrab: Octocrab,
}

impl GitHubClient {
    /// Build a client from a decrypted personal/OAuth access token.
    pub fn new(access_token: &str) -> Result<Self> {
        let octocrab = Octocrab::builder().personal_token(access_token.to_string()).build()?;
        Ok(Self { octocrab })
    }

    pub fn inner(&self) -> &Octocrab {
        &self.octocrab
    }
}

/// Split a `"{owner}/{repo}"` remote repository identifier, the shape stored
/// on `User::remote_repo_url`.
pub fn split_owner_repo(remote_repo_url: &str) -> Option<(&str, &str)> {
    let trimmed = remote_repo_url
        .trim_start_matches("https://github.com/")
        .trim_end_matches(".git")
        .trim_end_matches('/');
    trimmed.split_once('/')
}
