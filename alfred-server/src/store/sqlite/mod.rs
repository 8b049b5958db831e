//! SQLite implementation of [`Database`].
//!
//! # Transactions
//!
//! There is one connection, guarded by an async mutex. A transaction owns the
//! lock from `begin` until it is committed, rolled back or dropped, so
//! transactions are serialized. Each statement runs on the blocking pool; the
//! guard travels into `spawn_blocking` and back.
//!
//! If a request is cancelled while a statement is in flight, the guard is
//! released by the blocking task with the SQL transaction still open. `begin`
//! detects that (the connection is not in autocommit mode) and rolls it back
//! before starting a new one. A transaction dropped without `commit` hands
//! its guard to a blocking task that rolls back and then releases the lock.
//!
//! # Delivery retention
//!
//! Recorded delivery ids only matter while GitHub may still redeliver them.
//! Rows older than `DELIVERY_RETENTION_DAYS` are deleted each time the
//! database is opened.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table. When the schema needs to change,
//! increment `CURRENT_SCHEMA_VERSION` and add a migration in
//! `run_migrations()`.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;

use alfred_core::{Badge, Difficulty};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::{
    BadgeCounts, Claim, Database, Delivery, EntryKind, Issue, LedgerEntry, NewIssue,
    NewLedgerEntry, Participant, Publication, Repository, Solution, StoreError, Transaction,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// How long a recorded delivery id is kept for redelivery detection.
const DELIVERY_RETENTION_DAYS: i64 = 7;

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The database is configured with `journal_mode = WAL`,
    /// `synchronous = FULL` and `busy_timeout = 5000ms`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref).map_err(db_err("open database"))?;

        // In-memory databases report "memory" and have nothing to make durable.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(db_err("set journal_mode"))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the state directory must be on \
                     a filesystem that supports shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(db_err("configure pragmas"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err("create schema_version table"))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("get schema version"))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        let cutoff = Utc::now().timestamp() - DELIVERY_RETENTION_DAYS * SECONDS_PER_DAY;
        let pruned = prune_deliveries(&conn, cutoff)?;
        if pruned > 0 {
            info!("Pruned {} deliveries older than {} days", pruned, DELIVERY_RETENTION_DAYS);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a fresh in-memory database (for tests and dry runs).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS repositories (
                    url TEXT PRIMARY KEY,
                    on_display INTEGER NOT NULL DEFAULT 0,
                    installation_id INTEGER
                );

                CREATE TABLE IF NOT EXISTS repository_maintainers (
                    repo_url TEXT NOT NULL,
                    username TEXT NOT NULL,
                    PRIMARY KEY (repo_url, username)
                );

                CREATE TABLE IF NOT EXISTS participants (
                    username TEXT PRIMARY KEY,
                    bounty INTEGER NOT NULL DEFAULT 0,
                    help_count INTEGER NOT NULL DEFAULT 0,
                    doc_count INTEGER NOT NULL DEFAULT 0,
                    test_count INTEGER NOT NULL DEFAULT 0,
                    impact_count INTEGER NOT NULL DEFAULT 0,
                    bug_count INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS ledger_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL,
                    dispatcher TEXT NOT NULL,
                    proof_url TEXT NOT NULL,
                    amount INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_ledger_username
                    ON ledger_entries(username, id);

                CREATE TABLE IF NOT EXISTS issues (
                    url TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    repo_url TEXT NOT NULL,
                    difficulty TEXT NOT NULL DEFAULT 'UNSET',
                    bounty INTEGER NOT NULL DEFAULT 0,
                    tags TEXT NOT NULL DEFAULT '[]',
                    open INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS claims (
                    issue_url TEXT NOT NULL,
                    username TEXT NOT NULL,
                    claimed_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    PRIMARY KEY (issue_url, username)
                );

                CREATE TABLE IF NOT EXISTS solutions (
                    url TEXT PRIMARY KEY,
                    repo_url TEXT NOT NULL,
                    author TEXT NOT NULL,
                    merged INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS processed_deliveries (
                    delivery_id TEXT PRIMARY KEY,
                    event TEXT NOT NULL,
                    publications TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(db_err("migration v1"))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(db_err("update schema version"))?;

        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.conn.clone().lock_owned().await;
        let mut tx = SqliteTransaction { conn: Some(guard) };
        tx.run("begin", |conn| {
            if !conn.is_autocommit() {
                warn!("Rolling back a transaction abandoned by a cancelled request");
                conn.execute_batch("ROLLBACK")
                    .map_err(db_err("rollback abandoned transaction"))?;
            }
            conn.execute_batch("BEGIN IMMEDIATE").map_err(db_err("begin"))
        })
        .await?;
        Ok(Box::new(tx))
    }
}

pub struct SqliteTransaction {
    /// `None` only while a statement is running on the blocking pool.
    conn: Option<OwnedMutexGuard<Connection>>,
}

impl SqliteTransaction {
    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&mut self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let guard = self
            .conn
            .take()
            .ok_or_else(|| StoreError::storage(operation, "connection lost by an earlier statement"))?;

        let (guard, result) = tokio::task::spawn_blocking(move || {
            let result = f(&guard);
            (guard, result)
        })
        .await
        .map_err(|e| StoreError::storage(operation, e.to_string()))?;

        self.conn = Some(guard);
        result
    }
}

fn rollback_dropped(conn: &Connection) {
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!("Failed to roll back dropped transaction: {}", e);
        }
    }
}

impl Drop for SqliteTransaction {
    /// The rollback runs on the blocking pool, holding the connection guard
    /// until it finishes, so the next `begin` queues behind it. Without a
    /// runtime it runs inline. If it never runs, `begin` rolls back instead.
    fn drop(&mut self) {
        let Some(guard) = self.conn.take() else {
            return;
        };
        if guard.is_autocommit() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || rollback_dropped(&guard));
            }
            Err(_) => rollback_dropped(&guard),
        }
    }
}

/// Delete deliveries recorded before `cutoff` (unix seconds).
fn prune_deliveries(conn: &Connection, cutoff: i64) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM processed_deliveries WHERE recorded_at < ?1",
        params![cutoff],
    )
    .map_err(db_err("prune deliveries"))
}

fn db_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::storage(operation, e.to_string())
}

fn timestamp(secs: i64, what: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| StoreError::corruption(what))
}

fn installation_to_i64(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| {
        StoreError::storage(
            "upsert_repository",
            format!("installation id {} exceeds maximum storable value", id),
        )
    })
}

fn badge_column(badge: Badge) -> &'static str {
    match badge {
        Badge::Help => "help_count",
        Badge::Doc => "doc_count",
        Badge::Test => "test_count",
        Badge::Impact => "impact_count",
        Badge::Bug => "bug_count",
    }
}

fn read_count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    Ok(u32::try_from(value).unwrap_or(0))
}

fn read_tags(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|_| StoreError::corruption("issue tags JSON"))
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn repository(&mut self, url: &str) -> Result<Option<Repository>, StoreError> {
        let url = url.to_string();
        self.run("repository", move |conn| {
            let row: Option<(String, bool, Option<i64>)> = conn
                .query_row(
                    "SELECT url, on_display, installation_id FROM repositories WHERE url = ?1",
                    params![url],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(db_err("repository"))?;

            row.map(|(url, on_display, installation_id)| -> Result<Repository, StoreError> {
                let installation_id = installation_id
                    .map(u64::try_from)
                    .transpose()
                    .map_err(|_| StoreError::corruption("repository installation id"))?;
                Ok(Repository {
                    url,
                    on_display,
                    installation_id,
                })
            })
            .transpose()
        })
        .await
    }

    async fn upsert_repository(
        &mut self,
        url: &str,
        installation_id: Option<u64>,
    ) -> Result<(), StoreError> {
        let url = url.to_string();
        let installation_id = installation_id.map(installation_to_i64).transpose()?;
        self.run("upsert_repository", move |conn| {
            conn.execute(
                "INSERT INTO repositories (url, installation_id) VALUES (?1, ?2)
                 ON CONFLICT(url) DO UPDATE SET
                     installation_id = COALESCE(excluded.installation_id, installation_id)",
                params![url, installation_id],
            )
            .map_err(db_err("upsert_repository"))?;
            Ok(())
        })
        .await
    }

    async fn mark_repository_on_display(&mut self, url: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.run("mark_repository_on_display", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE repositories SET on_display = 1 WHERE url = ?1",
                    params![url],
                )
                .map_err(db_err("mark_repository_on_display"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn maintainers(&mut self, repo_url: &str) -> Result<Vec<String>, StoreError> {
        let repo_url = repo_url.to_string();
        self.run("maintainers", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT username FROM repository_maintainers
                     WHERE repo_url = ?1 ORDER BY username",
                )
                .map_err(db_err("maintainers"))?;
            let rows = stmt
                .query_map(params![repo_url], |row| row.get(0))
                .map_err(db_err("maintainers"))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
                .map_err(db_err("maintainers"))
        })
        .await
    }

    async fn add_maintainer(
        &mut self,
        repo_url: &str,
        username: &str,
    ) -> Result<bool, StoreError> {
        let repo_url = repo_url.to_string();
        let username = username.to_string();
        self.run("add_maintainer", move |conn| {
            let repo_exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM repositories WHERE url = ?1)",
                    params![repo_url],
                    |row| row.get(0),
                )
                .map_err(db_err("add_maintainer"))?;
            if !repo_exists {
                return Ok(false);
            }
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO repository_maintainers (repo_url, username)
                     VALUES (?1, ?2)",
                    params![repo_url, username],
                )
                .map_err(db_err("add_maintainer"))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn participant_exists(&mut self, username: &str) -> Result<bool, StoreError> {
        let username = username.to_string();
        self.run("participant_exists", move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM participants WHERE username = ?1)",
                params![username],
                |row| row.get(0),
            )
            .map_err(db_err("participant_exists"))
        })
        .await
    }

    async fn participant(&mut self, username: &str) -> Result<Option<Participant>, StoreError> {
        let username = username.to_string();
        self.run("participant", move |conn| {
            conn.query_row(
                "SELECT username, bounty, help_count, doc_count, test_count, impact_count,
                        bug_count
                 FROM participants WHERE username = ?1",
                params![username],
                |row| {
                    Ok(Participant {
                        username: row.get(0)?,
                        bounty: row.get(1)?,
                        badges: BadgeCounts {
                            help: read_count(row, 2)?,
                            doc: read_count(row, 3)?,
                            test: read_count(row, 4)?,
                            impact: read_count(row, 5)?,
                            bug: read_count(row, 6)?,
                        },
                    })
                },
            )
            .optional()
            .map_err(db_err("participant"))
        })
        .await
    }

    async fn add_participant(&mut self, username: &str) -> Result<bool, StoreError> {
        let username = username.to_string();
        self.run("add_participant", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO participants (username) VALUES (?1)",
                    params![username],
                )
                .map_err(db_err("add_participant"))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn adjust_bounty(&mut self, username: &str, delta: i64) -> Result<bool, StoreError> {
        let username = username.to_string();
        self.run("adjust_bounty", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE participants SET bounty = bounty + ?1 WHERE username = ?2",
                    params![delta, username],
                )
                .map_err(db_err("adjust_bounty"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn increment_badge(&mut self, username: &str, badge: Badge) -> Result<bool, StoreError> {
        let username = username.to_string();
        let column = badge_column(badge);
        self.run("increment_badge", move |conn| {
            let changed = conn
                .execute(
                    &format!(
                        "UPDATE participants SET {col} = {col} + 1 WHERE username = ?1",
                        col = column
                    ),
                    params![username],
                )
                .map_err(db_err("increment_badge"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn append_ledger_entry(&mut self, entry: &NewLedgerEntry) -> Result<i64, StoreError> {
        let entry = entry.clone();
        let now = Utc::now().timestamp();
        self.run("append_ledger_entry", move |conn| {
            conn.execute(
                "INSERT INTO ledger_entries
                     (username, dispatcher, proof_url, amount, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.username,
                    entry.dispatcher,
                    entry.proof_url,
                    entry.amount,
                    entry.kind.as_str(),
                    now
                ],
            )
            .map_err(db_err("append_ledger_entry"))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn ledger_entries(&mut self, username: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        let username = username.to_string();
        self.run("ledger_entries", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, username, dispatcher, proof_url, amount, kind, created_at
                     FROM ledger_entries WHERE username = ?1 ORDER BY id",
                )
                .map_err(db_err("ledger_entries"))?;
            let rows = stmt
                .query_map(params![username], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                })
                .map_err(db_err("ledger_entries"))?;

            let mut entries = Vec::new();
            for row in rows {
                let (id, username, dispatcher, proof_url, amount, kind, created_at) =
                    row.map_err(db_err("ledger_entries row"))?;
                entries.push(LedgerEntry {
                    id,
                    username,
                    dispatcher,
                    proof_url,
                    amount,
                    kind: EntryKind::parse(&kind)
                        .ok_or_else(|| StoreError::corruption("ledger entry kind"))?,
                    created_at: timestamp(created_at, "ledger entry timestamp")?,
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn issue(&mut self, url: &str) -> Result<Option<Issue>, StoreError> {
        let url = url.to_string();
        self.run("issue", move |conn| {
            let row = conn
                .query_row(
                    "SELECT url, title, repo_url, difficulty, bounty, tags, open, created_at
                     FROM issues WHERE url = ?1",
                    params![url],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, bool>(6)?,
                            row.get::<_, i64>(7)?,
                        ))
                    },
                )
                .optional()
                .map_err(db_err("issue"))?;

            let Some((url, title, repo_url, difficulty, bounty, tags, open, created_at)) = row
            else {
                return Ok(None);
            };

            Ok(Some(Issue {
                url,
                title,
                repo_url,
                difficulty: difficulty
                    .parse::<Difficulty>()
                    .map_err(|_| StoreError::corruption("issue difficulty"))?,
                bounty: u32::try_from(bounty)
                    .map_err(|_| StoreError::corruption("issue bounty"))?,
                tags: read_tags(&tags)?,
                open,
                created_at: timestamp(created_at, "issue timestamp")?,
            }))
        })
        .await
    }

    async fn insert_issue(&mut self, issue: &NewIssue) -> Result<bool, StoreError> {
        let issue = issue.clone();
        let now = Utc::now().timestamp();
        self.run("insert_issue", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO issues (url, title, repo_url, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![issue.url, issue.title, issue.repo_url, now],
                )
                .map_err(db_err("insert_issue"))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn reaccept_issue(&mut self, issue: &NewIssue) -> Result<bool, StoreError> {
        let issue = issue.clone();
        self.run("reaccept_issue", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE issues SET title = ?1, repo_url = ?2, open = 1
                     WHERE url = ?3 AND open = 0",
                    params![issue.title, issue.repo_url, issue.url],
                )
                .map_err(db_err("reaccept_issue"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_issue_open(&mut self, url: &str, open: bool) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.run("set_issue_open", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE issues SET open = ?1 WHERE url = ?2 AND open = ?3",
                    params![open, url, !open],
                )
                .map_err(db_err("set_issue_open"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_issue_difficulty(
        &mut self,
        url: &str,
        difficulty: Difficulty,
    ) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.run("set_issue_difficulty", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE issues SET difficulty = ?1 WHERE url = ?2",
                    params![difficulty.as_str(), url],
                )
                .map_err(db_err("set_issue_difficulty"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_issue_bounty(&mut self, url: &str, bounty: u32) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.run("set_issue_bounty", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE issues SET bounty = ?1 WHERE url = ?2",
                    params![bounty, url],
                )
                .map_err(db_err("set_issue_bounty"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn add_issue_tag(&mut self, url: &str, tag: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        let tag = tag.to_string();
        self.run("add_issue_tag", move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT tags FROM issues WHERE url = ?1",
                    params![url],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("add_issue_tag"))?;
            let Some(raw) = raw else {
                return Ok(false);
            };

            let mut tags = read_tags(&raw)?;
            if !tags.contains(&tag) {
                tags.push(tag);
                let encoded = serde_json::to_string(&tags)
                    .map_err(|e| StoreError::storage("add_issue_tag", e.to_string()))?;
                conn.execute(
                    "UPDATE issues SET tags = ?1 WHERE url = ?2",
                    params![encoded, url],
                )
                .map_err(db_err("add_issue_tag"))?;
            }
            Ok(true)
        })
        .await
    }

    async fn claim(
        &mut self,
        issue_url: &str,
        username: &str,
    ) -> Result<Option<Claim>, StoreError> {
        let issue_url = issue_url.to_string();
        let username = username.to_string();
        self.run("claim", move |conn| {
            let row: Option<(String, String, i64, i64)> = conn
                .query_row(
                    "SELECT issue_url, username, claimed_at, expires_at FROM claims
                     WHERE issue_url = ?1 AND username = ?2",
                    params![issue_url, username],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(db_err("claim"))?;

            row.map(|(issue_url, username, claimed_at, expires_at)| -> Result<Claim, StoreError> {
                Ok(Claim {
                    issue_url,
                    username,
                    claimed_at: timestamp(claimed_at, "claim timestamp")?,
                    expires_at: timestamp(expires_at, "claim expiry")?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn insert_claim(&mut self, claim: &Claim) -> Result<bool, StoreError> {
        let claim = claim.clone();
        self.run("insert_claim", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO claims (issue_url, username, claimed_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        claim.issue_url,
                        claim.username,
                        claim.claimed_at.timestamp(),
                        claim.expires_at.timestamp()
                    ],
                )
                .map_err(db_err("insert_claim"))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn delete_claim(&mut self, issue_url: &str, username: &str) -> Result<bool, StoreError> {
        let issue_url = issue_url.to_string();
        let username = username.to_string();
        self.run("delete_claim", move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM claims WHERE issue_url = ?1 AND username = ?2",
                    params![issue_url, username],
                )
                .map_err(db_err("delete_claim"))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn extend_claim(
        &mut self,
        issue_url: &str,
        username: &str,
        days: u32,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let issue_url = issue_url.to_string();
        let username = username.to_string();
        let seconds = i64::from(days) * SECONDS_PER_DAY;
        self.run("extend_claim", move |conn| {
            let expires_at: Option<i64> = conn
                .query_row(
                    "UPDATE claims SET expires_at = expires_at + ?1
                     WHERE issue_url = ?2 AND username = ?3
                     RETURNING expires_at",
                    params![seconds, issue_url, username],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("extend_claim"))?;
            expires_at
                .map(|secs| timestamp(secs, "claim expiry"))
                .transpose()
        })
        .await
    }

    async fn solution(&mut self, url: &str) -> Result<Option<Solution>, StoreError> {
        let url = url.to_string();
        self.run("solution", move |conn| {
            conn.query_row(
                "SELECT url, repo_url, author, merged FROM solutions WHERE url = ?1",
                params![url],
                |row| {
                    Ok(Solution {
                        url: row.get(0)?,
                        repo_url: row.get(1)?,
                        author: row.get(2)?,
                        merged: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err("solution"))
        })
        .await
    }

    async fn insert_solution(&mut self, solution: &Solution) -> Result<bool, StoreError> {
        let solution = solution.clone();
        self.run("insert_solution", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO solutions (url, repo_url, author, merged)
                     VALUES (?1, ?2, ?3, 0)",
                    params![solution.url, solution.repo_url, solution.author],
                )
                .map_err(db_err("insert_solution"))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn mark_solution_merged(&mut self, url: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.run("mark_solution_merged", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE solutions SET merged = 1 WHERE url = ?1 AND merged = 0",
                    params![url],
                )
                .map_err(db_err("mark_solution_merged"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_solution(&mut self, url: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.run("delete_solution", move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM solutions WHERE url = ?1 AND merged = 0",
                    params![url],
                )
                .map_err(db_err("delete_solution"))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delivery(&mut self, id: &str) -> Result<Option<Delivery>, StoreError> {
        let id = id.to_string();
        self.run("delivery", move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT delivery_id, event, publications FROM processed_deliveries
                     WHERE delivery_id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(db_err("delivery"))?;

            row.map(|(id, event, publications)| -> Result<Delivery, StoreError> {
                let publications: Vec<Publication> = serde_json::from_str(&publications)
                    .map_err(|_| StoreError::corruption("delivery publications JSON"))?;
                Ok(Delivery {
                    id,
                    event,
                    publications,
                })
            })
            .transpose()
        })
        .await
    }

    async fn record_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError> {
        let delivery = delivery.clone();
        let now = Utc::now().timestamp();
        self.run("record_delivery", move |conn| {
            let publications = serde_json::to_string(&delivery.publications)
                .map_err(|e| StoreError::storage("record_delivery", e.to_string()))?;
            conn.execute(
                "INSERT INTO processed_deliveries (delivery_id, event, publications, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![delivery.id, delivery.event, publications, now],
            )
            .map_err(db_err("record_delivery"))?;
            Ok(())
        })
        .await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.run("commit", |conn| {
            conn.execute_batch("COMMIT").map_err(db_err("commit"))
        })
        .await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.run("rollback", |conn| {
            conn.execute_batch("ROLLBACK").map_err(db_err("rollback"))
        })
        .await
    }
}
