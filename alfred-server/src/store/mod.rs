//! Relational store abstraction.
//!
//! The dispatcher talks to the store only through [`Database`] and
//! [`Transaction`]. Every operation runs inside a caller-managed transaction:
//! `commit` consumes it, and dropping it without committing rolls back.
//!
//! Guarded operations report a miss through their return value (`false` or
//! `None`) rather than an error, so callers can turn it into a precise
//! precondition failure. [`StoreError`] is reserved for infrastructure faults.

mod memory;
mod sqlite;

pub use memory::InMemoryDatabase;
pub use sqlite::SqliteDatabase;

use alfred_core::{Badge, Difficulty, LedgerKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation '{operation}' failed: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("stored {what} is corrupt")]
    Corruption { what: &'static str },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        StoreError::Corruption { what }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub url: String,
    pub on_display: bool,
    pub installation_id: Option<u64>,
}

/// Per-badge award counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadgeCounts {
    pub help: u32,
    pub doc: u32,
    pub test: u32,
    pub impact: u32,
    pub bug: u32,
}

impl BadgeCounts {
    pub fn get(&self, badge: Badge) -> u32 {
        match badge {
            Badge::Help => self.help,
            Badge::Doc => self.doc,
            Badge::Test => self.test,
            Badge::Impact => self.impact,
            Badge::Bug => self.bug,
        }
    }

    pub fn increment(&mut self, badge: Badge) {
        let slot = match badge {
            Badge::Help => &mut self.help,
            Badge::Doc => &mut self.doc,
            Badge::Test => &mut self.test,
            Badge::Impact => &mut self.impact,
            Badge::Bug => &mut self.bug,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub username: String,
    /// Sum of the signed amounts of this participant's bounty ledger rows.
    pub bounty: i64,
    pub badges: BadgeCounts,
}

/// What a ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Ledger(LedgerKind),
    Badge(Badge),
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Ledger(kind) => kind.as_str(),
            EntryKind::Badge(badge) => badge.as_str(),
        }
    }

    pub fn parse(s: &str) -> Option<EntryKind> {
        match s {
            "bounty" => Some(EntryKind::Ledger(LedgerKind::Bounty)),
            "penalty" => Some(EntryKind::Ledger(LedgerKind::Penalty)),
            other => Badge::ALL
                .into_iter()
                .find(|b| b.as_str() == other)
                .map(EntryKind::Badge),
        }
    }
}

/// Input for [`Transaction::append_ledger_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub username: String,
    /// Maintainer who issued the award.
    pub dispatcher: String,
    pub proof_url: String,
    pub amount: i64,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub username: String,
    pub dispatcher: String,
    pub proof_url: String,
    pub amount: i64,
    pub kind: EntryKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub url: String,
    pub title: String,
    pub repo_url: String,
    pub difficulty: Difficulty,
    pub bounty: u32,
    pub tags: Vec<String>,
    pub open: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub url: String,
    pub title: String,
    pub repo_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub issue_url: String,
    pub username: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub url: String,
    pub repo_url: String,
    pub author: String,
    pub merged: bool,
}

/// One stream append, captured so a redelivery can repeat it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub stream: String,
    pub data: String,
}

/// A committed GitHub delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub event: String,
    pub publications: Vec<Publication>,
}

/// Entry point: hands out transactions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// One open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait Transaction: Send {
    // Repositories

    async fn repository(&mut self, url: &str) -> Result<Option<Repository>, StoreError>;

    /// Create the repository if needed and attach the installation.
    async fn upsert_repository(
        &mut self,
        url: &str,
        installation_id: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Returns `false` if the repository is not known.
    async fn mark_repository_on_display(&mut self, url: &str) -> Result<bool, StoreError>;

    async fn maintainers(&mut self, repo_url: &str) -> Result<Vec<String>, StoreError>;

    /// Returns `false` if the repository is not known or the user is already
    /// a maintainer.
    async fn add_maintainer(&mut self, repo_url: &str, username: &str)
        -> Result<bool, StoreError>;

    // Participants

    async fn participant_exists(&mut self, username: &str) -> Result<bool, StoreError>;

    async fn participant(&mut self, username: &str) -> Result<Option<Participant>, StoreError>;

    /// Returns `false` if the participant already exists.
    async fn add_participant(&mut self, username: &str) -> Result<bool, StoreError>;

    /// Returns `false` if the participant does not exist.
    async fn adjust_bounty(&mut self, username: &str, delta: i64) -> Result<bool, StoreError>;

    /// Returns `false` if the participant does not exist.
    async fn increment_badge(&mut self, username: &str, badge: Badge) -> Result<bool, StoreError>;

    // Ledger

    async fn append_ledger_entry(&mut self, entry: &NewLedgerEntry) -> Result<i64, StoreError>;

    /// Entries for one user, oldest first.
    async fn ledger_entries(&mut self, username: &str) -> Result<Vec<LedgerEntry>, StoreError>;

    // Issues

    async fn issue(&mut self, url: &str) -> Result<Option<Issue>, StoreError>;

    /// Insert an open issue. Returns `false` if a row with this URL exists.
    async fn insert_issue(&mut self, issue: &NewIssue) -> Result<bool, StoreError>;

    /// Reopen a closed issue, refreshing its title and repository. Returns
    /// `false` unless a closed row with this URL existed.
    async fn reaccept_issue(&mut self, issue: &NewIssue) -> Result<bool, StoreError>;

    /// Move the issue to `open`. Returns `false` unless the issue exists and
    /// was in the opposite state.
    async fn set_issue_open(&mut self, url: &str, open: bool) -> Result<bool, StoreError>;

    async fn set_issue_difficulty(
        &mut self,
        url: &str,
        difficulty: Difficulty,
    ) -> Result<bool, StoreError>;

    async fn set_issue_bounty(&mut self, url: &str, bounty: u32) -> Result<bool, StoreError>;

    /// Add a tag unless present. Returns `false` only if the issue is unknown.
    async fn add_issue_tag(&mut self, url: &str, tag: &str) -> Result<bool, StoreError>;

    // Claims

    async fn claim(&mut self, issue_url: &str, username: &str)
        -> Result<Option<Claim>, StoreError>;

    /// Returns `false` if the pair is already claimed.
    async fn insert_claim(&mut self, claim: &Claim) -> Result<bool, StoreError>;

    async fn delete_claim(&mut self, issue_url: &str, username: &str)
        -> Result<bool, StoreError>;

    /// Push the expiry back by `days`. Returns the new expiry, or `None` if
    /// there is no such claim.
    async fn extend_claim(
        &mut self,
        issue_url: &str,
        username: &str,
        days: u32,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    // Solutions

    async fn solution(&mut self, url: &str) -> Result<Option<Solution>, StoreError>;

    /// Insert an unmerged solution. Returns `false` if the URL exists.
    async fn insert_solution(&mut self, solution: &Solution) -> Result<bool, StoreError>;

    /// Returns `false` unless an unmerged solution with this URL existed.
    async fn mark_solution_merged(&mut self, url: &str) -> Result<bool, StoreError>;

    /// Delete an unmerged solution. Returns `false` if none was deleted.
    async fn delete_solution(&mut self, url: &str) -> Result<bool, StoreError>;

    // Deliveries

    async fn delivery(&mut self, id: &str) -> Result<Option<Delivery>, StoreError>;

    async fn record_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError>;

    // Completion

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
