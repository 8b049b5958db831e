//! Event classification.
//!
//! Maps the `X-GitHub-Event` label plus the raw body to one handled event
//! variant. Labels outside the dispatch table, and actions within a handled
//! label that the pipeline does not act on, are reported as
//! [`Classification::NotHandled`] so the caller can acknowledge them. A body
//! that does not match the shape its label declares is a [`ClassifyError`].

use thiserror::Error;

use crate::label::{InvalidBountyLabel, LabelKind};
use crate::payload::{
    InstallationPayload, IssueCommentPayload, IssuesPayload, PingPayload, PullRequestPayload,
};

/// Header carrying the event label.
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying the per-delivery GUID. Redeliveries reuse it.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// The issue an event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub url: String,
    pub title: String,
    pub repo_url: String,
}

/// A classified event, decoded into exactly the fields its handler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Repository-level ping. Organisation hooks carry no repository.
    Ping { repo_url: Option<String> },
    InstallationCreated {
        installation_id: u64,
        repo_urls: Vec<String>,
    },
    IssueLabeled {
        issue: IssueRef,
        label: LabelKind,
        sender: String,
    },
    IssueAssigned {
        issue: IssueRef,
        assignee: Option<String>,
    },
    IssueUnassigned {
        issue: IssueRef,
        assignee: Option<String>,
    },
    IssueClosed { issue: IssueRef },
    IssueReopened { issue: IssueRef },
    CommentCreated {
        issue: IssueRef,
        author: String,
        body: String,
    },
    PullRequestOpened {
        url: String,
        repo_url: String,
        author: String,
    },
    PullRequestClosed {
        url: String,
        repo_url: String,
        author: String,
        merged: bool,
    },
}

impl WebhookEvent {
    /// Short name used in logs and responses.
    pub fn name(&self) -> &'static str {
        match self {
            WebhookEvent::Ping { .. } => "ping",
            WebhookEvent::InstallationCreated { .. } => "installation.created",
            WebhookEvent::IssueLabeled { .. } => "issues.labeled",
            WebhookEvent::IssueAssigned { .. } => "issues.assigned",
            WebhookEvent::IssueUnassigned { .. } => "issues.unassigned",
            WebhookEvent::IssueClosed { .. } => "issues.closed",
            WebhookEvent::IssueReopened { .. } => "issues.reopened",
            WebhookEvent::CommentCreated { .. } => "issue_comment.created",
            WebhookEvent::PullRequestOpened { .. } => "pull_request.opened",
            WebhookEvent::PullRequestClosed { .. } => "pull_request.closed",
        }
    }
}

/// Outcome of classification that is not a client error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Handled(WebhookEvent),
    NotHandled { event: String, reason: String },
}

impl Classification {
    fn not_handled(event: &str, reason: impl Into<String>) -> Self {
        Classification::NotHandled {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("payload does not match the '{event}' event shape: {source}")]
    Shape {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("'{event}.{action}' payload is missing '{field}'")]
    MissingField {
        event: String,
        action: String,
        field: &'static str,
    },
    #[error(transparent)]
    BountyLabel(#[from] InvalidBountyLabel),
}

/// The fixed dispatch table: every label the pipeline has a handler for.
pub const HANDLED_EVENTS: &[&str] = &[
    "ping",
    "installation",
    "issues",
    "issue_comment",
    "pull_request",
];

/// Classify an event by its label and raw body.
pub fn classify(event_type: &str, body: &[u8]) -> Result<Classification, ClassifyError> {
    match event_type {
        "ping" => classify_ping(body),
        "installation" => classify_installation(body),
        "issues" => classify_issues(body),
        "issue_comment" => classify_issue_comment(body),
        "pull_request" => classify_pull_request(body),
        other => Ok(Classification::not_handled(
            other,
            format!("event type '{}' is not handled", other),
        )),
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &str, body: &[u8]) -> Result<T, ClassifyError> {
    serde_json::from_slice(body).map_err(|source| ClassifyError::Shape {
        event: event.to_string(),
        source,
    })
}

fn classify_ping(body: &[u8]) -> Result<Classification, ClassifyError> {
    let payload: PingPayload = decode("ping", body)?;
    Ok(Classification::Handled(WebhookEvent::Ping {
        repo_url: payload.repository.map(|r| r.html_url),
    }))
}

fn classify_installation(body: &[u8]) -> Result<Classification, ClassifyError> {
    let payload: InstallationPayload = decode("installation", body)?;
    match payload.action.as_str() {
        "created" | "new_permissions_accepted" => {
            Ok(Classification::Handled(WebhookEvent::InstallationCreated {
                installation_id: payload.installation.id,
                repo_urls: payload.repositories.iter().map(|r| r.url()).collect(),
            }))
        }
        action => Ok(Classification::not_handled(
            "installation",
            format!("installation action '{}' is not handled", action),
        )),
    }
}

fn classify_issues(body: &[u8]) -> Result<Classification, ClassifyError> {
    let payload: IssuesPayload = decode("issues", body)?;
    let issue = IssueRef {
        url: payload.issue.html_url,
        title: payload.issue.title,
        repo_url: payload.repository.html_url,
    };

    let event = match payload.action.as_str() {
        "labeled" => {
            let label = payload.label.ok_or_else(|| ClassifyError::MissingField {
                event: "issues".to_string(),
                action: payload.action.clone(),
                field: "label",
            })?;
            WebhookEvent::IssueLabeled {
                issue,
                label: LabelKind::classify(&label.name)?,
                sender: payload.sender.login,
            }
        }
        "assigned" => WebhookEvent::IssueAssigned {
            issue,
            assignee: payload.assignee.map(|u| u.login),
        },
        "unassigned" => WebhookEvent::IssueUnassigned {
            issue,
            assignee: payload.assignee.map(|u| u.login),
        },
        "closed" => WebhookEvent::IssueClosed { issue },
        "reopened" => WebhookEvent::IssueReopened { issue },
        action => {
            return Ok(Classification::not_handled(
                "issues",
                format!("issue action '{}' is not handled", action),
            ))
        }
    };

    Ok(Classification::Handled(event))
}

fn classify_issue_comment(body: &[u8]) -> Result<Classification, ClassifyError> {
    let payload: IssueCommentPayload = decode("issue_comment", body)?;
    if payload.action != "created" {
        return Ok(Classification::not_handled(
            "issue_comment",
            format!("comment action '{}' is not handled", payload.action),
        ));
    }

    Ok(Classification::Handled(WebhookEvent::CommentCreated {
        issue: IssueRef {
            url: payload.issue.html_url,
            title: payload.issue.title,
            repo_url: payload.repository.html_url,
        },
        author: payload.comment.user.login,
        body: payload.comment.body,
    }))
}

fn classify_pull_request(body: &[u8]) -> Result<Classification, ClassifyError> {
    let payload: PullRequestPayload = decode("pull_request", body)?;
    let pr = payload.pull_request;
    let repo_url = payload.repository.html_url;

    match payload.action.as_str() {
        "opened" => Ok(Classification::Handled(WebhookEvent::PullRequestOpened {
            url: pr.html_url,
            repo_url,
            author: pr.user.login,
        })),
        "closed" => Ok(Classification::Handled(WebhookEvent::PullRequestClosed {
            url: pr.html_url,
            repo_url,
            author: pr.user.login,
            merged: pr.merged.unwrap_or(false),
        })),
        action => Ok(Classification::not_handled(
            "pull_request",
            format!("pull request action '{}' is not handled", action),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Difficulty;
    use serde_json::{json, Value};

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    fn repo() -> Value {
        json!({"full_name": "amrita/alfred", "html_url": "https://github.com/amrita/alfred"})
    }

    fn issue() -> Value {
        json!({"html_url": "https://github.com/amrita/alfred/issues/7", "title": "Fix parser"})
    }

    fn issues_payload(action: &str, extra: Value) -> Vec<u8> {
        let mut base = json!({
            "action": action,
            "issue": issue(),
            "repository": repo(),
            "sender": {"login": "maintainer"}
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
            base.extend(extra);
        }
        bytes(base)
    }

    #[test]
    fn test_unknown_event_type_is_not_handled() {
        let result = classify("star", b"{}").unwrap();
        assert!(matches!(
            result,
            Classification::NotHandled { ref event, .. } if event == "star"
        ));
    }

    #[test]
    fn test_unknown_event_type_with_garbage_body_is_not_an_error() {
        // Unhandled labels are acknowledged without decoding the body.
        assert!(classify("watch", b"not json").is_ok());
    }

    #[test]
    fn test_ping_with_repository() {
        let body = bytes(json!({"zen": "Keep it logically awesome.", "repository": repo()}));
        assert_eq!(
            classify("ping", &body).unwrap(),
            Classification::Handled(WebhookEvent::Ping {
                repo_url: Some("https://github.com/amrita/alfred".to_string())
            })
        );
    }

    #[test]
    fn test_ping_without_repository() {
        let body = bytes(json!({"zen": "Design for failure.", "hook_id": 1}));
        assert_eq!(
            classify("ping", &body).unwrap(),
            Classification::Handled(WebhookEvent::Ping { repo_url: None })
        );
    }

    #[test]
    fn test_installation_created() {
        let body = bytes(json!({
            "action": "created",
            "installation": {"id": 42},
            "repositories": [{"full_name": "amrita/alfred"}, {"full_name": "amrita/pulse"}]
        }));
        assert_eq!(
            classify("installation", &body).unwrap(),
            Classification::Handled(WebhookEvent::InstallationCreated {
                installation_id: 42,
                repo_urls: vec![
                    "https://github.com/amrita/alfred".to_string(),
                    "https://github.com/amrita/pulse".to_string()
                ],
            })
        );
    }

    #[test]
    fn test_installation_deleted_is_not_handled() {
        let body = bytes(json!({"action": "deleted", "installation": {"id": 42}}));
        assert!(matches!(
            classify("installation", &body).unwrap(),
            Classification::NotHandled { .. }
        ));
    }

    #[test]
    fn test_issue_labeled_accepted() {
        let body = issues_payload("labeled", json!({"label": {"name": "amsoc-accepted"}}));
        match classify("issues", &body).unwrap() {
            Classification::Handled(WebhookEvent::IssueLabeled {
                issue,
                label,
                sender,
            }) => {
                assert_eq!(issue.url, "https://github.com/amrita/alfred/issues/7");
                assert_eq!(issue.title, "Fix parser");
                assert_eq!(issue.repo_url, "https://github.com/amrita/alfred");
                assert_eq!(label, LabelKind::Accepted);
                assert_eq!(sender, "maintainer");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_issue_labeled_difficulty() {
        let body = issues_payload("labeled", json!({"label": {"name": "Hard"}}));
        assert!(matches!(
            classify("issues", &body).unwrap(),
            Classification::Handled(WebhookEvent::IssueLabeled {
                label: LabelKind::Difficulty(Difficulty::Hard),
                ..
            })
        ));
    }

    #[test]
    fn test_issue_labeled_without_label_is_malformed() {
        let body = issues_payload("labeled", json!({}));
        assert!(matches!(
            classify("issues", &body),
            Err(ClassifyError::MissingField { field: "label", .. })
        ));
    }

    #[test]
    fn test_issue_labeled_bad_bounty_is_malformed() {
        let body = issues_payload("labeled", json!({"label": {"name": "bounty-many"}}));
        assert!(matches!(
            classify("issues", &body),
            Err(ClassifyError::BountyLabel(_))
        ));
    }

    #[test]
    fn test_issue_assigned_with_null_assignee() {
        let body = issues_payload("assigned", json!({"assignee": null}));
        assert!(matches!(
            classify("issues", &body).unwrap(),
            Classification::Handled(WebhookEvent::IssueAssigned { assignee: None, .. })
        ));
    }

    #[test]
    fn test_issue_edited_is_not_handled() {
        let body = issues_payload("edited", json!({}));
        assert!(matches!(
            classify("issues", &body).unwrap(),
            Classification::NotHandled { .. }
        ));
    }

    #[test]
    fn test_issues_body_with_wrong_shape_is_malformed() {
        let body = bytes(json!({"action": "opened", "pull_request": {}}));
        assert!(matches!(
            classify("issues", &body),
            Err(ClassifyError::Shape { .. })
        ));
    }

    #[test]
    fn test_comment_created() {
        let body = bytes(json!({
            "action": "created",
            "issue": issue(),
            "repository": repo(),
            "comment": {"body": "/assign", "user": {"login": "alice"}}
        }));
        match classify("issue_comment", &body).unwrap() {
            Classification::Handled(WebhookEvent::CommentCreated { author, body, .. }) => {
                assert_eq!(author, "alice");
                assert_eq!(body, "/assign");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_comment_edited_is_not_handled() {
        let body = bytes(json!({
            "action": "edited",
            "issue": issue(),
            "repository": repo(),
            "comment": {"body": "/assign", "user": {"login": "alice"}}
        }));
        assert!(matches!(
            classify("issue_comment", &body).unwrap(),
            Classification::NotHandled { .. }
        ));
    }

    #[test]
    fn test_pull_request_closed_merged_and_unmerged() {
        for merged in [true, false] {
            let body = bytes(json!({
                "action": "closed",
                "repository": repo(),
                "pull_request": {
                    "html_url": "https://github.com/amrita/alfred/pull/9",
                    "user": {"login": "alice"},
                    "merged": merged
                }
            }));
            assert_eq!(
                classify("pull_request", &body).unwrap(),
                Classification::Handled(WebhookEvent::PullRequestClosed {
                    url: "https://github.com/amrita/alfred/pull/9".to_string(),
                    repo_url: "https://github.com/amrita/alfred".to_string(),
                    author: "alice".to_string(),
                    merged,
                })
            );
        }
    }

    #[test]
    fn test_pull_request_synchronize_is_not_handled() {
        let body = bytes(json!({
            "action": "synchronize",
            "repository": repo(),
            "pull_request": {
                "html_url": "https://github.com/amrita/alfred/pull/9",
                "user": {"login": "alice"}
            }
        }));
        assert!(matches!(
            classify("pull_request", &body).unwrap(),
            Classification::NotHandled { .. }
        ));
    }

    #[test]
    fn test_handled_table_covers_classifier() {
        // Every label in the table decodes (and fails on a non-object body)
        // rather than falling through to "not handled".
        for label in HANDLED_EVENTS {
            assert!(classify(label, b"42").is_err(), "{} fell through", label);
        }
    }
}
