//! In-memory implementation of [`Database`].
//!
//! A transaction takes the table lock, works on a private copy of the tables
//! and writes the copy back on commit. Dropping it discards the copy. Used by
//! tests, which can also make the next commit fail.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alfred_core::{Badge, Difficulty};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    Claim, Database, Delivery, Issue, LedgerEntry, NewIssue, NewLedgerEntry, Participant,
    Repository, Solution, StoreError, Transaction,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    repositories: HashMap<String, Repository>,
    maintainers: HashMap<String, BTreeSet<String>>,
    participants: HashMap<String, Participant>,
    ledger: Vec<LedgerEntry>,
    issues: HashMap<String, Issue>,
    claims: HashMap<(String, String), Claim>,
    solutions: HashMap<String, Solution>,
    deliveries: HashMap<String, Delivery>,
}

#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail with a storage error and discard its
    /// changes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of delivery ids committed so far.
    pub async fn delivery_count(&self) -> usize {
        self.tables.lock().await.deliveries.len()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            fail_commit: self.fail_next_commit.clone(),
        }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn repository(&mut self, url: &str) -> Result<Option<Repository>, StoreError> {
        Ok(self.working.repositories.get(url).cloned())
    }

    async fn upsert_repository(
        &mut self,
        url: &str,
        installation_id: Option<u64>,
    ) -> Result<(), StoreError> {
        let repo = self
            .working
            .repositories
            .entry(url.to_string())
            .or_insert_with(|| Repository {
                url: url.to_string(),
                on_display: false,
                installation_id: None,
            });
        if installation_id.is_some() {
            repo.installation_id = installation_id;
        }
        Ok(())
    }

    async fn mark_repository_on_display(&mut self, url: &str) -> Result<bool, StoreError> {
        match self.working.repositories.get_mut(url) {
            Some(repo) => {
                repo.on_display = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn maintainers(&mut self, repo_url: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .working
            .maintainers
            .get(repo_url)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_maintainer(
        &mut self,
        repo_url: &str,
        username: &str,
    ) -> Result<bool, StoreError> {
        if !self.working.repositories.contains_key(repo_url) {
            return Ok(false);
        }
        Ok(self
            .working
            .maintainers
            .entry(repo_url.to_string())
            .or_default()
            .insert(username.to_string()))
    }

    async fn participant_exists(&mut self, username: &str) -> Result<bool, StoreError> {
        Ok(self.working.participants.contains_key(username))
    }

    async fn participant(&mut self, username: &str) -> Result<Option<Participant>, StoreError> {
        Ok(self.working.participants.get(username).cloned())
    }

    async fn add_participant(&mut self, username: &str) -> Result<bool, StoreError> {
        if self.working.participants.contains_key(username) {
            return Ok(false);
        }
        self.working.participants.insert(
            username.to_string(),
            Participant {
                username: username.to_string(),
                bounty: 0,
                badges: Default::default(),
            },
        );
        Ok(true)
    }

    async fn adjust_bounty(&mut self, username: &str, delta: i64) -> Result<bool, StoreError> {
        match self.working.participants.get_mut(username) {
            Some(p) => {
                p.bounty += delta;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_badge(&mut self, username: &str, badge: Badge) -> Result<bool, StoreError> {
        match self.working.participants.get_mut(username) {
            Some(p) => {
                p.badges.increment(badge);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_ledger_entry(&mut self, entry: &NewLedgerEntry) -> Result<i64, StoreError> {
        let id = self.working.ledger.len() as i64 + 1;
        self.working.ledger.push(LedgerEntry {
            id,
            username: entry.username.clone(),
            dispatcher: entry.dispatcher.clone(),
            proof_url: entry.proof_url.clone(),
            amount: entry.amount,
            kind: entry.kind,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn ledger_entries(&mut self, username: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .ledger
            .iter()
            .filter(|e| e.username == username)
            .cloned()
            .collect())
    }

    async fn issue(&mut self, url: &str) -> Result<Option<Issue>, StoreError> {
        Ok(self.working.issues.get(url).cloned())
    }

    async fn insert_issue(&mut self, issue: &NewIssue) -> Result<bool, StoreError> {
        if self.working.issues.contains_key(&issue.url) {
            return Ok(false);
        }
        self.working.issues.insert(
            issue.url.clone(),
            Issue {
                url: issue.url.clone(),
                title: issue.title.clone(),
                repo_url: issue.repo_url.clone(),
                difficulty: Difficulty::Unset,
                bounty: 0,
                tags: Vec::new(),
                open: true,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn reaccept_issue(&mut self, issue: &NewIssue) -> Result<bool, StoreError> {
        match self.working.issues.get_mut(&issue.url) {
            Some(row) if !row.open => {
                row.title = issue.title.clone();
                row.repo_url = issue.repo_url.clone();
                row.open = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_issue_open(&mut self, url: &str, open: bool) -> Result<bool, StoreError> {
        match self.working.issues.get_mut(url) {
            Some(issue) if issue.open != open => {
                issue.open = open;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_issue_difficulty(
        &mut self,
        url: &str,
        difficulty: Difficulty,
    ) -> Result<bool, StoreError> {
        match self.working.issues.get_mut(url) {
            Some(issue) => {
                issue.difficulty = difficulty;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_issue_bounty(&mut self, url: &str, bounty: u32) -> Result<bool, StoreError> {
        match self.working.issues.get_mut(url) {
            Some(issue) => {
                issue.bounty = bounty;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_issue_tag(&mut self, url: &str, tag: &str) -> Result<bool, StoreError> {
        match self.working.issues.get_mut(url) {
            Some(issue) => {
                if !issue.tags.iter().any(|t| t == tag) {
                    issue.tags.push(tag.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim(
        &mut self,
        issue_url: &str,
        username: &str,
    ) -> Result<Option<Claim>, StoreError> {
        Ok(self
            .working
            .claims
            .get(&(issue_url.to_string(), username.to_string()))
            .cloned())
    }

    async fn insert_claim(&mut self, claim: &Claim) -> Result<bool, StoreError> {
        let key = (claim.issue_url.clone(), claim.username.clone());
        if self.working.claims.contains_key(&key) {
            return Ok(false);
        }
        self.working.claims.insert(key, claim.clone());
        Ok(true)
    }

    async fn delete_claim(&mut self, issue_url: &str, username: &str) -> Result<bool, StoreError> {
        Ok(self
            .working
            .claims
            .remove(&(issue_url.to_string(), username.to_string()))
            .is_some())
    }

    async fn extend_claim(
        &mut self,
        issue_url: &str,
        username: &str,
        days: u32,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .working
            .claims
            .get_mut(&(issue_url.to_string(), username.to_string()))
            .map(|claim| {
                claim.expires_at += Duration::days(i64::from(days));
                claim.expires_at
            }))
    }

    async fn solution(&mut self, url: &str) -> Result<Option<Solution>, StoreError> {
        Ok(self.working.solutions.get(url).cloned())
    }

    async fn insert_solution(&mut self, solution: &Solution) -> Result<bool, StoreError> {
        if self.working.solutions.contains_key(&solution.url) {
            return Ok(false);
        }
        self.working.solutions.insert(
            solution.url.clone(),
            Solution {
                merged: false,
                ..solution.clone()
            },
        );
        Ok(true)
    }

    async fn mark_solution_merged(&mut self, url: &str) -> Result<bool, StoreError> {
        match self.working.solutions.get_mut(url) {
            Some(solution) if !solution.merged => {
                solution.merged = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_solution(&mut self, url: &str) -> Result<bool, StoreError> {
        match self.working.solutions.get(url) {
            Some(solution) if !solution.merged => {
                self.working.solutions.remove(url);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delivery(&mut self, id: &str) -> Result<Option<Delivery>, StoreError> {
        Ok(self.working.deliveries.get(id).cloned())
    }

    async fn record_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError> {
        if self.working.deliveries.contains_key(&delivery.id) {
            return Err(StoreError::storage(
                "record_delivery",
                format!("delivery {} already recorded", delivery.id),
            ));
        }
        self.working
            .deliveries
            .insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction {
            mut guard,
            working,
            fail_commit,
        } = *self;
        if fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::storage("commit", "injected commit failure"));
        }
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
