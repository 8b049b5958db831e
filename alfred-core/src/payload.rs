//! Raw GitHub webhook payload shapes.
//!
//! Only the fields the pipeline reads are declared; serde ignores the rest.
//! Each event label decodes into exactly one of these types, so a payload
//! that does not fit its declared label fails to deserialize.

use serde::{Deserialize, Deserializer};

/// GitHub logins compare case-insensitively; every login is stored and
/// matched in this lower-case form.
pub fn normalize_login(login: &str) -> String {
    login.to_ascii_lowercase()
}

fn lowercase_login<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let login = String::deserialize(deserializer)?;
    Ok(normalize_login(&login))
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    #[serde(deserialize_with = "lowercase_login")]
    pub login: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub full_name: String,
    pub html_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub html_url: String,
    pub title: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub body: String,
    pub user: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub html_url: String,
    pub user: User,
    #[serde(default)]
    pub merged: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

/// Repository entry in an installation payload. GitHub omits `html_url` here.
#[derive(Debug, Deserialize, Clone)]
pub struct InstallationRepository {
    pub full_name: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl InstallationRepository {
    pub fn url(&self) -> String {
        self.html_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}", self.full_name))
    }
}

#[derive(Debug, Deserialize)]
pub struct PingPayload {
    #[serde(default)]
    pub zen: Option<String>,
    #[serde(default)]
    pub repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
pub struct InstallationPayload {
    pub action: String,
    pub installation: Installation,
    #[serde(default)]
    pub repositories: Vec<InstallationRepository>,
}

#[derive(Debug, Deserialize)]
pub struct IssuesPayload {
    pub action: String,
    pub issue: Issue,
    pub repository: Repository,
    pub sender: User,
    #[serde(default)]
    pub label: Option<Label>,
    #[serde(default)]
    pub assignee: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct IssueCommentPayload {
    pub action: String,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
}
