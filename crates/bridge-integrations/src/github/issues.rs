//! Issue CRUD against a single owner/repo.

use bridge_core::model::{IssueIndexRow, IssueState};

use super::client::{GitHubClient, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubLabel {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: IssueState,
    pub labels: Vec<GitHubLabel>,
    pub html_url: String,
}

impl GitHubIssue {
    /// Project down to the row format committed into `issue.md` /
    /// `issue_archived.md`.
    pub fn to_index_row(&self, owner: &str, repo: &str) -> IssueIndexRow {
        IssueIndexRow {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number: self.number,
            title: self.title.clone(),
            state: self.state,
        }
    }
}

pub async fn list_issues(
    client: &GitHubClient,
    owner: &str,
    repo: &str,
    state_filter: Option<IssueState>,
) -> Result<Vec<GitHubIssue>> {
    let issue_handler = client.octocrab.issues(owner, repo);
    let mut handler = issue_handler.list();
    if let Some(state) = state_filter {
        handler = handler.state(match state {
            IssueState::Open => octocrab::params::State::Open,
            IssueState::Closed => octocrab::params::State::Closed,
        });
    }
    let page = handler.send().await?;
    Ok(page.items.into_iter().map(octocrab_issue_to_github_issue).collect())
}

pub async fn create_issue(client: &GitHubClient, owner: &str, repo: &str, title: &str, body: &str) -> Result<GitHubIssue> {
    let issue = client.octocrab.issues(owner, repo).create(title).body(body).send().await?;
    Ok(octocrab_issue_to_github_issue(issue))
}

pub async fn close_issue(client: &GitHubClient, owner: &str, repo: &str, number: u64) -> Result<GitHubIssue> {
    let issue = client
        .octocrab
        .issues(owner, repo)
        .update(number)
        .state(octocrab::models::IssueState::Closed)
        .send()
        .await?;
    Ok(octocrab_issue_to_github_issue(issue))
}

pub async fn comment_on_issue(client: &GitHubClient, owner: &str, repo: &str, number: u64, body: &str) -> Result<()> {
    client.octocrab.issues(owner, repo).create_comment(number, body).await?;
    Ok(())
}

fn octocrab_issue_to_github_issue(issue: octocrab::models::issues::Issue) -> GitHubIssue {
    let state = match issue.state {
        octocrab::models::IssueState::Closed => IssueState::Closed,
        _ => IssueState::Open,
    };
    GitHubIssue {
        number: issue.number,
        title: issue.title,
        body: issue.body,
        state,
        labels: issue.labels.iter().map(|l| GitHubLabel { name: l.name.clone() }).collect(),
        html_url: issue.html_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_index_row_projects_fields() {
        let issue = GitHubIssue {
            number: 7,
            title: "Bug".into(),
            body: Some("steps...".into()),
            state: IssueState::Open,
            labels: vec![],
            html_url: "https://github.com/acme/x/issues/7".into(),
        };
        let row = issue.to_index_row("acme", "x");
        assert_eq!(row.owner, "acme");
        assert_eq!(row.number, 7);
        assert_eq!(row.state, IssueState::Open);
    }
}
