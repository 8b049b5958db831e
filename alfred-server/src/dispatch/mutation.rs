//! State mutations and their guards.
//!
//! [`apply`] runs one [`Mutation`] inside a caller-owned transaction and
//! returns the stream records it derives. Guard failures come back as
//! [`Precondition`] errors, leaving the caller to drop the transaction.

use alfred_core::{Badge, Difficulty, IssueRef, LedgerKind, StreamRecord};
use chrono::{Duration, SubsecRound, Utc};
use tracing::info;

use super::{DispatchError, Precondition};
use crate::store::{Claim, EntryKind, NewIssue, NewLedgerEntry, Solution, Transaction};

/// Where a claim change came from.
///
/// Assignment events are GitHub's own echo of claim changes and are
/// tolerated where a comment would be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimSource {
    Comment,
    Assignment,
}

/// One state change, fully resolved from its event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    DisplayRepository {
        repo_url: String,
    },
    InstallRepositories {
        installation_id: u64,
        repo_urls: Vec<String>,
    },
    AcceptIssue(IssueRef),
    SetDifficulty {
        issue_url: String,
        difficulty: Difficulty,
    },
    SetBounty {
        issue_url: String,
        amount: u32,
    },
    AddTag {
        issue_url: String,
        tag: String,
    },
    CloseIssue {
        issue_url: String,
    },
    ReopenIssue {
        issue_url: String,
    },
    Claim {
        issue_url: String,
        username: String,
        source: ClaimSource,
    },
    Unclaim {
        issue_url: String,
        username: String,
        source: ClaimSource,
    },
    Extend {
        issue_url: String,
        username: String,
        days: u32,
    },
    Ledger {
        issue_url: String,
        dispatcher: String,
        username: String,
        kind: LedgerKind,
        amount: u32,
    },
    Achievement {
        issue_url: String,
        dispatcher: String,
        username: String,
        badge: Badge,
    },
    OpenSolution {
        url: String,
        repo_url: String,
        author: String,
    },
    MergeSolution {
        url: String,
        author: String,
    },
    DiscardSolution {
        url: String,
    },
}

/// Result of a mutation that passed its guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// State changed. These records must be published after commit.
    Records(Vec<StreamRecord>),
    /// Nothing to change; the transaction should be abandoned.
    Skipped(String),
}

impl Applied {
    fn none() -> Self {
        Applied::Records(Vec::new())
    }

    fn one(record: StreamRecord) -> Self {
        Applied::Records(vec![record])
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Applied::Skipped(reason.into())
    }
}

fn not_found(what: impl Into<String>) -> DispatchError {
    DispatchError::Precondition(Precondition::NotFound(what.into()))
}

fn already_exists(what: impl Into<String>) -> DispatchError {
    DispatchError::Precondition(Precondition::AlreadyExists(what.into()))
}

fn invalid_state(what: impl Into<String>) -> DispatchError {
    DispatchError::Precondition(Precondition::InvalidState(what.into()))
}

pub async fn apply(
    tx: &mut dyn Transaction,
    mutation: &Mutation,
    claim_window_days: u32,
) -> Result<Applied, DispatchError> {
    match mutation {
        Mutation::DisplayRepository { repo_url } => {
            if !tx.mark_repository_on_display(repo_url).await? {
                return Err(not_found(format!("repository {}", repo_url)));
            }
            info!("Repository {} is now on display", repo_url);
            Ok(Applied::none())
        }

        Mutation::InstallRepositories {
            installation_id,
            repo_urls,
        } => {
            for url in repo_urls {
                tx.upsert_repository(url, Some(*installation_id)).await?;
            }
            info!(
                "Installation {} covers {} repositories",
                installation_id,
                repo_urls.len()
            );
            Ok(Applied::none())
        }

        Mutation::AcceptIssue(issue) => {
            let new_issue = NewIssue {
                url: issue.url.clone(),
                title: issue.title.clone(),
                repo_url: issue.repo_url.clone(),
            };
            let accepted = match tx.issue(&issue.url).await? {
                Some(existing) if existing.open => false,
                // A closed issue is moved back to open under its current title.
                Some(_) => tx.reaccept_issue(&new_issue).await?,
                None => tx.insert_issue(&new_issue).await?,
            };
            if !accepted {
                return Err(already_exists(format!("issue {}", issue.url)));
            }
            info!("Accepted issue {}", issue.url);
            Ok(Applied::none())
        }

        Mutation::SetDifficulty {
            issue_url,
            difficulty,
        } => {
            if !tx.set_issue_difficulty(issue_url, *difficulty).await? {
                return Err(not_found(format!("issue {}", issue_url)));
            }
            Ok(Applied::none())
        }

        Mutation::SetBounty { issue_url, amount } => {
            if !tx.set_issue_bounty(issue_url, *amount).await? {
                return Err(not_found(format!("issue {}", issue_url)));
            }
            Ok(Applied::none())
        }

        Mutation::AddTag { issue_url, tag } => {
            if !tx.add_issue_tag(issue_url, tag).await? {
                return Err(not_found(format!("issue {}", issue_url)));
            }
            Ok(Applied::none())
        }

        Mutation::CloseIssue { issue_url } => transition_issue(tx, issue_url, false).await,

        Mutation::ReopenIssue { issue_url } => transition_issue(tx, issue_url, true).await,

        Mutation::Claim {
            issue_url,
            username,
            source,
        } => claim(tx, issue_url, username, *source, claim_window_days).await,

        Mutation::Unclaim {
            issue_url,
            username,
            source,
        } => {
            if !tx.delete_claim(issue_url, username).await? {
                return match source {
                    ClaimSource::Assignment => Ok(Applied::skipped(format!(
                        "{} holds no claim on {}",
                        username, issue_url
                    ))),
                    ClaimSource::Comment => Err(not_found(format!(
                        "claim by {} on {}",
                        username, issue_url
                    ))),
                };
            }
            info!("{} released {}", username, issue_url);
            Ok(Applied::one(StreamRecord::unclaimed(username, issue_url)))
        }

        Mutation::Extend {
            issue_url,
            username,
            days,
        } => match tx.extend_claim(issue_url, username, *days).await? {
            Some(expires_at) => {
                info!(
                    "Claim by {} on {} now expires at {}",
                    username, issue_url, expires_at
                );
                Ok(Applied::one(StreamRecord::extended(username, issue_url)))
            }
            None => Err(not_found(format!("claim by {} on {}", username, issue_url))),
        },

        Mutation::Ledger {
            issue_url,
            dispatcher,
            username,
            kind,
            amount,
        } => {
            let delta = kind.signed(*amount);
            if !tx.adjust_bounty(username, delta).await? {
                return Err(not_found(format!("participant {}", username)));
            }
            tx.append_ledger_entry(&NewLedgerEntry {
                username: username.clone(),
                dispatcher: dispatcher.clone(),
                proof_url: issue_url.clone(),
                amount: delta,
                kind: EntryKind::Ledger(*kind),
            })
            .await?;
            info!("{} {} {} for {}", dispatcher, kind.as_str(), amount, username);
            Ok(Applied::one(StreamRecord::ledger(
                *kind, username, *amount, issue_url,
            )))
        }

        Mutation::Achievement {
            issue_url,
            dispatcher,
            username,
            badge,
        } => {
            if !tx.increment_badge(username, *badge).await? {
                return Err(not_found(format!("participant {}", username)));
            }
            tx.append_ledger_entry(&NewLedgerEntry {
                username: username.clone(),
                dispatcher: dispatcher.clone(),
                proof_url: issue_url.clone(),
                amount: 1,
                kind: EntryKind::Badge(*badge),
            })
            .await?;
            info!("{} awarded {} to {}", dispatcher, badge.as_str(), username);
            Ok(Applied::one(StreamRecord::achievement(
                *badge, username, issue_url,
            )))
        }

        Mutation::OpenSolution {
            url,
            repo_url,
            author,
        } => {
            let inserted = tx
                .insert_solution(&Solution {
                    url: url.clone(),
                    repo_url: repo_url.clone(),
                    author: author.clone(),
                    merged: false,
                })
                .await?;
            if !inserted {
                return Err(already_exists(format!("solution {}", url)));
            }
            Ok(Applied::one(StreamRecord::solution(author, url, false)))
        }

        Mutation::MergeSolution { url, author } => {
            match tx.solution(url).await? {
                None => return Err(not_found(format!("solution {}", url))),
                Some(solution) if solution.merged => {
                    return Err(invalid_state(format!("solution {} is already merged", url)))
                }
                Some(_) => {}
            }
            if !tx.mark_solution_merged(url).await? {
                return Err(invalid_state(format!("solution {} is already merged", url)));
            }
            info!("Solution {} by {} merged", url, author);
            Ok(Applied::one(StreamRecord::solution(author, url, true)))
        }

        Mutation::DiscardSolution { url } => {
            if !tx.delete_solution(url).await? {
                return Ok(Applied::skipped(format!("no open solution {}", url)));
            }
            Ok(Applied::none())
        }
    }
}

async fn transition_issue(
    tx: &mut dyn Transaction,
    issue_url: &str,
    open: bool,
) -> Result<Applied, DispatchError> {
    if tx.issue(issue_url).await?.is_none() {
        return Err(not_found(format!("issue {}", issue_url)));
    }
    if !tx.set_issue_open(issue_url, open).await? {
        let state = if open { "open" } else { "closed" };
        return Err(invalid_state(format!(
            "issue {} is already {}",
            issue_url, state
        )));
    }
    Ok(Applied::none())
}

async fn claim(
    tx: &mut dyn Transaction,
    issue_url: &str,
    username: &str,
    source: ClaimSource,
    claim_window_days: u32,
) -> Result<Applied, DispatchError> {
    let issue = match (tx.issue(issue_url).await?, source) {
        (Some(issue), _) => issue,
        (None, ClaimSource::Assignment) => {
            return Ok(Applied::skipped(format!("issue {} is not tracked", issue_url)))
        }
        (None, ClaimSource::Comment) => {
            return Err(not_found(format!("issue {}", issue_url)));
        }
    };
    if !issue.open {
        return Err(invalid_state(format!("issue {} is closed", issue_url)));
    }

    if !tx.participant_exists(username).await? {
        return match source {
            ClaimSource::Assignment => Ok(Applied::skipped(format!(
                "{} is not a participant",
                username
            ))),
            ClaimSource::Comment => Err(not_found(format!("participant {}", username))),
        };
    }

    let claimed_at = Utc::now().trunc_subsecs(0);
    let inserted = tx
        .insert_claim(&Claim {
            issue_url: issue_url.to_string(),
            username: username.to_string(),
            claimed_at,
            expires_at: claimed_at + Duration::days(i64::from(claim_window_days)),
        })
        .await?;
    if !inserted {
        return match source {
            ClaimSource::Assignment => Ok(Applied::skipped(format!(
                "{} already holds {}",
                username, issue_url
            ))),
            ClaimSource::Comment => Err(already_exists(format!(
                "claim by {} on {}",
                username, issue_url
            ))),
        };
    }

    info!("{} claimed {}", username, issue_url);
    Ok(Applied::one(StreamRecord::claimed(username, issue_url)))
}
