//! Transactional dispatch of classified events.
//!
//! Each event becomes at most one [`Mutation`]. The mutation runs in a single
//! relational transaction together with the delivery-id record, and only
//! after that transaction commits are its records appended to the stream
//! store. A failed transaction therefore never publishes. A failed append
//! after a successful commit is reported as an error so GitHub redelivers;
//! the redelivery finds its delivery id already committed and re-appends the
//! stored records without mutating again.

mod mutation;


pub use mutation::{apply, Applied, ClaimSource, Mutation};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alfred_core::{
    parse_comment, Command, CommandSyntaxError, Commentator, LabelKind, StreamRecord,
    WebhookEvent, RECORD_FIELD,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::commentator::resolve_commentator;
use crate::config::Timeouts;
use crate::store::{Database, Delivery, Publication, StoreError};
use crate::stream::{StreamError, StreamStore};

/// A state guard that rejected the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid command: {0}")]
    Syntax(#[from] CommandSyntaxError),
    #[error(transparent)]
    Precondition(#[from] Precondition),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
}

/// What a successful dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Mutation committed and its records appended.
    Applied { published: usize },
    /// Delivery was already committed; its records were appended again.
    Replayed { published: usize },
    /// Nothing to do for this event.
    Skipped { reason: String },
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Applied { published } => {
                write!(f, "applied, {} record(s) published", published)
            }
            DispatchOutcome::Replayed { published } => {
                write!(f, "already applied, {} record(s) republished", published)
            }
            DispatchOutcome::Skipped { reason } => write!(f, "ignored: {}", reason),
        }
    }
}

enum Plan {
    Mutate(Mutation),
    Skip(String),
}

enum Executed {
    Committed(Vec<Publication>),
    Replay(Vec<Publication>),
    Skipped(String),
}

pub struct Dispatcher {
    db: Arc<dyn Database>,
    streams: Arc<dyn StreamStore>,
    timeouts: Timeouts,
    claim_window_days: u32,
}

impl Dispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        streams: Arc<dyn StreamStore>,
        timeouts: Timeouts,
        claim_window_days: u32,
    ) -> Self {
        Self {
            db,
            streams,
            timeouts,
            claim_window_days,
        }
    }

    /// Handle one classified event.
    ///
    /// `delivery_id` is GitHub's delivery GUID; without it the event is
    /// processed with no redelivery guard.
    pub async fn dispatch(
        &self,
        event: WebhookEvent,
        delivery_id: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let event_name = event.name();

        let mutation = match self.plan(event).await? {
            Plan::Mutate(mutation) => mutation,
            Plan::Skip(reason) => {
                info!("Ignoring {}: {}", event_name, reason);
                return Ok(DispatchOutcome::Skipped { reason });
            }
        };

        debug!("Executing {:?}", mutation);

        let executed = bounded(
            self.timeouts.transaction,
            "transaction",
            self.execute(event_name, &mutation, delivery_id),
        )
        .await??;

        match executed {
            Executed::Committed(publications) => {
                self.publish(&publications).await?;
                Ok(DispatchOutcome::Applied {
                    published: publications.len(),
                })
            }
            Executed::Replay(publications) => {
                info!(
                    "Delivery {} already committed, republishing {} record(s)",
                    delivery_id.unwrap_or("-"),
                    publications.len()
                );
                self.publish(&publications).await?;
                Ok(DispatchOutcome::Replayed {
                    published: publications.len(),
                })
            }
            Executed::Skipped(reason) => {
                info!("Ignoring {}: {}", event_name, reason);
                Ok(DispatchOutcome::Skipped { reason })
            }
        }
    }

    /// Decide what, if anything, the event should change.
    async fn plan(&self, event: WebhookEvent) -> Result<Plan, DispatchError> {
        let mutation = match event {
            WebhookEvent::Ping { repo_url: None } => {
                return Ok(Plan::Skip("ping without a repository".to_string()))
            }
            WebhookEvent::Ping {
                repo_url: Some(repo_url),
            } => Mutation::DisplayRepository { repo_url },

            WebhookEvent::InstallationCreated {
                installation_id,
                repo_urls,
            } => Mutation::InstallRepositories {
                installation_id,
                repo_urls,
            },

            WebhookEvent::IssueLabeled {
                issue,
                label,
                sender,
            } => {
                let role = self.resolve(&issue.repo_url, &sender).await?;
                if role != Commentator::Maintainer {
                    return Ok(Plan::Skip(format!(
                        "label applied by {} ({})",
                        sender, role
                    )));
                }
                match label {
                    LabelKind::Accepted => Mutation::AcceptIssue(issue),
                    LabelKind::Difficulty(difficulty) => Mutation::SetDifficulty {
                        issue_url: issue.url,
                        difficulty,
                    },
                    LabelKind::Bounty(amount) => Mutation::SetBounty {
                        issue_url: issue.url,
                        amount,
                    },
                    LabelKind::Tag(tag) => Mutation::AddTag {
                        issue_url: issue.url,
                        tag,
                    },
                }
            }

            WebhookEvent::IssueAssigned { assignee: None, .. }
            | WebhookEvent::IssueUnassigned { assignee: None, .. } => {
                return Ok(Plan::Skip("no assignee".to_string()))
            }
            WebhookEvent::IssueAssigned {
                issue,
                assignee: Some(username),
            } => Mutation::Claim {
                issue_url: issue.url,
                username,
                source: ClaimSource::Assignment,
            },
            WebhookEvent::IssueUnassigned {
                issue,
                assignee: Some(username),
            } => Mutation::Unclaim {
                issue_url: issue.url,
                username,
                source: ClaimSource::Assignment,
            },

            WebhookEvent::IssueClosed { issue } => Mutation::CloseIssue {
                issue_url: issue.url,
            },
            WebhookEvent::IssueReopened { issue } => Mutation::ReopenIssue {
                issue_url: issue.url,
            },

            WebhookEvent::CommentCreated {
                issue,
                author,
                body,
            } => {
                let role = self.resolve(&issue.repo_url, &author).await?;
                if role == Commentator::Unknown {
                    return Ok(Plan::Skip(format!("{} is not a known commentator", author)));
                }
                let Some(command) = parse_comment(&body, role, &author)? else {
                    return Ok(Plan::Skip("no command".to_string()));
                };
                info!("{} {} issued {}", role, author, command);
                command_mutation(command, issue.url, author)
            }

            WebhookEvent::PullRequestOpened {
                url,
                repo_url,
                author,
            } => Mutation::OpenSolution {
                url,
                repo_url,
                author,
            },
            WebhookEvent::PullRequestClosed {
                url,
                author,
                merged: true,
                ..
            } => Mutation::MergeSolution { url, author },
            WebhookEvent::PullRequestClosed {
                url, merged: false, ..
            } => Mutation::DiscardSolution { url },
        };

        Ok(Plan::Mutate(mutation))
    }

    async fn resolve(&self, repo_url: &str, username: &str) -> Result<Commentator, DispatchError> {
        let role = bounded(
            self.timeouts.lookup,
            "commentator lookup",
            resolve_commentator(self.db.as_ref(), repo_url, username),
        )
        .await??;
        Ok(role)
    }

    /// Run the mutation and record the delivery in one transaction.
    ///
    /// Any early return drops the transaction, which rolls it back.
    async fn execute(
        &self,
        event_name: &str,
        mutation: &Mutation,
        delivery_id: Option<&str>,
    ) -> Result<Executed, DispatchError> {
        let mut tx = self.db.begin().await?;

        if let Some(id) = delivery_id {
            if let Some(delivery) = tx.delivery(id).await? {
                tx.rollback().await?;
                return Ok(Executed::Replay(delivery.publications));
            }
        }

        let records = match apply(&mut *tx, mutation, self.claim_window_days).await? {
            Applied::Records(records) => records,
            Applied::Skipped(reason) => {
                tx.rollback().await?;
                return Ok(Executed::Skipped(reason));
            }
        };

        let publications = records
            .iter()
            .map(to_publication)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(id) = delivery_id {
            tx.record_delivery(&Delivery {
                id: id.to_string(),
                event: event_name.to_string(),
                publications: publications.clone(),
            })
            .await?;
        }

        tx.commit().await?;
        Ok(Executed::Committed(publications))
    }

    async fn publish(&self, publications: &[Publication]) -> Result<(), DispatchError> {
        for publication in publications {
            let id = bounded(
                self.timeouts.stream,
                "stream append",
                self.streams
                    .append(&publication.stream, &[(RECORD_FIELD, publication.data.as_str())]),
            )
            .await??;
            debug!("Appended {} to {}", id, publication.stream);
        }
        Ok(())
    }
}

fn command_mutation(command: Command, issue_url: String, author: String) -> Mutation {
    match command {
        Command::Assign { participant } => Mutation::Claim {
            issue_url,
            username: participant,
            source: ClaimSource::Comment,
        },
        Command::Unassign { participant } => Mutation::Unclaim {
            issue_url,
            username: participant,
            source: ClaimSource::Comment,
        },
        Command::Ledger {
            kind,
            amount,
            target,
        } => Mutation::Ledger {
            issue_url,
            dispatcher: author,
            username: target,
            kind,
            amount,
        },
        Command::Achievement { badge, target } => Mutation::Achievement {
            issue_url,
            dispatcher: author,
            username: target,
            badge,
        },
        Command::Extend { days, target } => Mutation::Extend {
            issue_url,
            username: target,
            days,
        },
    }
}

fn to_publication(record: &StreamRecord) -> Result<Publication, StreamError> {
    Ok(Publication {
        stream: record.channel().as_str().to_string(),
        data: record.to_json()?,
    })
}

/// Run `future` with an upper bound, mapping expiry to [`DispatchError::Timeout`].
async fn bounded<F, T>(
    limit: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, DispatchError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| DispatchError::Timeout { operation })
}
