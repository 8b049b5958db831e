//! Tests for the SQLite store.

use alfred_core::{Badge, Difficulty, LedgerKind};
use chrono::{Duration, SubsecRound, Utc};
use rusqlite::params;

use super::super::{
    Claim, Database, Delivery, EntryKind, NewIssue, NewLedgerEntry, Publication, Solution,
};
use super::{SqliteDatabase, CURRENT_SCHEMA_VERSION, DELIVERY_RETENTION_DAYS, SECONDS_PER_DAY};

use proptest::prelude::*;

const REPO: &str = "https://github.com/amrita/alfred";
const ISSUE: &str = "https://github.com/amrita/alfred/issues/1";
const PR: &str = "https://github.com/amrita/alfred/pull/2";

fn new_issue(url: &str) -> NewIssue {
    NewIssue {
        url: url.to_string(),
        title: "Fix the parser".to_string(),
        repo_url: REPO.to_string(),
    }
}

fn claim_for(username: &str) -> Claim {
    let now = Utc::now().trunc_subsecs(0);
    Claim {
        issue_url: ISSUE.to_string(),
        username: username.to_string(),
        claimed_at: now,
        expires_at: now + Duration::days(8),
    }
}

fn solution() -> Solution {
    Solution {
        url: PR.to_string(),
        repo_url: REPO.to_string(),
        author: "alice".to_string(),
        merged: false,
    }
}

#[tokio::test]
async fn test_fresh_database_has_current_schema_version() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let conn = db.conn.lock().await;
    let version: i64 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn test_newer_schema_version_is_rejected() {
    let dir = std::env::temp_dir().join(format!("alfred-schema-{}", uuid::Uuid::new_v4()));
    let path = dir.join("alfred.db");
    drop(SqliteDatabase::new(&path).unwrap());

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE schema_version SET version = ?1 WHERE id = 1",
            params![CURRENT_SCHEMA_VERSION + 1],
        )
        .unwrap();
    }

    assert!(SqliteDatabase::new(&path).is_err());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_reopen_keeps_data() {
    let dir = std::env::temp_dir().join(format!("alfred-reopen-{}", uuid::Uuid::new_v4()));
    let path = dir.join("alfred.db");
    let rt = tokio::runtime::Runtime::new().unwrap();

    rt.block_on(async {
        let db = SqliteDatabase::new(&path).unwrap();
        let mut tx = db.begin().await.unwrap();
        tx.add_participant("alice").await.unwrap();
        tx.commit().await.unwrap();
    });

    rt.block_on(async {
        let db = SqliteDatabase::new(&path).unwrap();
        let mut tx = db.begin().await.unwrap();
        assert!(tx.participant_exists("alice").await.unwrap());
    });

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_commit_and_rollback() {
    let db = SqliteDatabase::new_in_memory().unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.add_participant("alice").await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.add_participant("bob").await.unwrap();
    tx.rollback().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    assert!(tx.participant_exists("alice").await.unwrap());
    assert!(!tx.participant_exists("bob").await.unwrap());
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    {
        let mut tx = db.begin().await.unwrap();
        tx.add_participant("alice").await.unwrap();
    }
    let mut tx = db.begin().await.unwrap();
    assert!(!tx.participant_exists("alice").await.unwrap());
}

#[tokio::test]
async fn test_drop_rolls_back_before_releasing_connection() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();
    tx.add_participant("alice").await.unwrap();
    drop(tx);

    // The guard is only released once the rollback has run.
    let conn = db.conn.lock().await;
    assert!(conn.is_autocommit());
}

#[test]
fn test_drop_outside_runtime_rolls_back_inline() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let db = SqliteDatabase::new_in_memory().unwrap();
    let tx = rt.block_on(async {
        let mut tx = db.begin().await.unwrap();
        tx.add_participant("alice").await.unwrap();
        tx
    });

    drop(tx);

    let conn = db.conn.try_lock().unwrap();
    assert!(conn.is_autocommit());
}

#[tokio::test]
async fn test_begin_rolls_back_abandoned_transaction() {
    let db = SqliteDatabase::new_in_memory().unwrap();

    // Simulate a request cancelled mid-statement: the SQL transaction is left
    // open on the connection after its owner is gone.
    {
        let conn = db.conn.lock().await;
        conn.execute_batch("BEGIN; INSERT INTO participants (username) VALUES ('ghost');")
            .unwrap();
        assert!(!conn.is_autocommit());
    }

    let mut tx = db.begin().await.unwrap();
    assert!(!tx.participant_exists("ghost").await.unwrap());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_repository_upsert_and_display() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(!tx.mark_repository_on_display(REPO).await.unwrap());

    tx.upsert_repository(REPO, Some(42)).await.unwrap();
    // A later upsert without an installation keeps the existing one.
    tx.upsert_repository(REPO, None).await.unwrap();
    assert!(tx.mark_repository_on_display(REPO).await.unwrap());

    let repo = tx.repository(REPO).await.unwrap().unwrap();
    assert!(repo.on_display);
    assert_eq!(repo.installation_id, Some(42));

    tx.upsert_repository(REPO, Some(43)).await.unwrap();
    let repo = tx.repository(REPO).await.unwrap().unwrap();
    assert_eq!(repo.installation_id, Some(43));
    assert!(repo.on_display);
}

#[tokio::test]
async fn test_maintainers() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(!tx.add_maintainer(REPO, "carol").await.unwrap());

    tx.upsert_repository(REPO, None).await.unwrap();
    assert!(tx.add_maintainer(REPO, "carol").await.unwrap());
    assert!(tx.add_maintainer(REPO, "bob").await.unwrap());
    assert!(!tx.add_maintainer(REPO, "carol").await.unwrap());

    assert_eq!(tx.maintainers(REPO).await.unwrap(), vec!["bob", "carol"]);
    assert!(tx.maintainers("https://github.com/other/repo").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_participant_bounty_and_badges() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(!tx.adjust_bounty("alice", 10).await.unwrap());
    assert!(!tx.increment_badge("alice", Badge::Doc).await.unwrap());

    assert!(tx.add_participant("alice").await.unwrap());
    assert!(!tx.add_participant("alice").await.unwrap());

    assert!(tx.adjust_bounty("alice", 50).await.unwrap());
    assert!(tx.adjust_bounty("alice", -20).await.unwrap());
    assert!(tx.increment_badge("alice", Badge::Doc).await.unwrap());
    assert!(tx.increment_badge("alice", Badge::Doc).await.unwrap());
    assert!(tx.increment_badge("alice", Badge::Bug).await.unwrap());

    let alice = tx.participant("alice").await.unwrap().unwrap();
    assert_eq!(alice.bounty, 30);
    assert_eq!(alice.badges.get(Badge::Doc), 2);
    assert_eq!(alice.badges.get(Badge::Bug), 1);
    assert_eq!(alice.badges.get(Badge::Help), 0);
}

#[tokio::test]
async fn test_ledger_entries_in_order() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    for (amount, kind) in [
        (50, EntryKind::Ledger(LedgerKind::Bounty)),
        (-50, EntryKind::Ledger(LedgerKind::Penalty)),
        (1, EntryKind::Badge(Badge::Impact)),
    ] {
        tx.append_ledger_entry(&NewLedgerEntry {
            username: "alice".to_string(),
            dispatcher: "carol".to_string(),
            proof_url: ISSUE.to_string(),
            amount,
            kind,
        })
        .await
        .unwrap();
    }

    let entries = tx.ledger_entries("alice").await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].amount, 50);
    assert_eq!(entries[1].kind, EntryKind::Ledger(LedgerKind::Penalty));
    assert_eq!(entries[2].kind, EntryKind::Badge(Badge::Impact));
    assert!(entries.iter().all(|e| e.dispatcher == "carol"));
    assert!(entries[0].id < entries[1].id);
    assert!(tx.ledger_entries("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_issue_lifecycle() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(tx.issue(ISSUE).await.unwrap().is_none());
    assert!(tx.insert_issue(&new_issue(ISSUE)).await.unwrap());
    assert!(!tx.insert_issue(&new_issue(ISSUE)).await.unwrap());

    let issue = tx.issue(ISSUE).await.unwrap().unwrap();
    assert!(issue.open);
    assert_eq!(issue.difficulty, Difficulty::Unset);
    assert_eq!(issue.bounty, 0);
    assert!(issue.tags.is_empty());
    assert_eq!(issue.repo_url, REPO);

    assert!(!tx.set_issue_open(ISSUE, true).await.unwrap());
    assert!(tx.set_issue_open(ISSUE, false).await.unwrap());
    assert!(!tx.set_issue_open(ISSUE, false).await.unwrap());
    assert!(!tx.issue(ISSUE).await.unwrap().unwrap().open);
    assert!(tx.set_issue_open(ISSUE, true).await.unwrap());
}

#[tokio::test]
async fn test_reaccept_only_moves_closed_issue() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(!tx.reaccept_issue(&new_issue(ISSUE)).await.unwrap());
    tx.insert_issue(&new_issue(ISSUE)).await.unwrap();
    tx.set_issue_bounty(ISSUE, 25).await.unwrap();
    assert!(!tx.reaccept_issue(&new_issue(ISSUE)).await.unwrap());

    tx.set_issue_open(ISSUE, false).await.unwrap();
    let renamed = NewIssue {
        title: "Fix the lexer".to_string(),
        ..new_issue(ISSUE)
    };
    assert!(tx.reaccept_issue(&renamed).await.unwrap());

    let issue = tx.issue(ISSUE).await.unwrap().unwrap();
    assert!(issue.open);
    assert_eq!(issue.title, "Fix the lexer");
    assert_eq!(issue.bounty, 25);
}

#[tokio::test]
async fn test_issue_attribute_updates_require_row() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(!tx.set_issue_difficulty(ISSUE, Difficulty::Hard).await.unwrap());
    assert!(!tx.set_issue_bounty(ISSUE, 100).await.unwrap());
    assert!(!tx.add_issue_tag(ISSUE, "GOOD FIRST ISSUE").await.unwrap());

    tx.insert_issue(&new_issue(ISSUE)).await.unwrap();
    assert!(tx.set_issue_difficulty(ISSUE, Difficulty::Hard).await.unwrap());
    assert!(tx.set_issue_bounty(ISSUE, 100).await.unwrap());
    assert!(tx.add_issue_tag(ISSUE, "GOOD FIRST ISSUE").await.unwrap());
    assert!(tx.add_issue_tag(ISSUE, "GOOD FIRST ISSUE").await.unwrap());
    assert!(tx.add_issue_tag(ISSUE, "RUST").await.unwrap());

    let issue = tx.issue(ISSUE).await.unwrap().unwrap();
    assert_eq!(issue.difficulty, Difficulty::Hard);
    assert_eq!(issue.bounty, 100);
    assert_eq!(issue.tags, vec!["GOOD FIRST ISSUE", "RUST"]);
}

#[tokio::test]
async fn test_claims() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();
    let claim = claim_for("alice");

    assert!(tx.insert_claim(&claim).await.unwrap());
    assert!(!tx.insert_claim(&claim).await.unwrap());
    assert_eq!(tx.claim(ISSUE, "alice").await.unwrap(), Some(claim.clone()));

    let extended = tx.extend_claim(ISSUE, "alice", 3).await.unwrap().unwrap();
    assert_eq!(extended, claim.expires_at + Duration::days(3));
    assert!(tx.extend_claim(ISSUE, "bob", 3).await.unwrap().is_none());

    assert!(tx.delete_claim(ISSUE, "alice").await.unwrap());
    assert!(!tx.delete_claim(ISSUE, "alice").await.unwrap());
    assert!(tx.claim(ISSUE, "alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_solution_lifecycle() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();

    assert!(!tx.mark_solution_merged(PR).await.unwrap());
    assert!(!tx.delete_solution(PR).await.unwrap());

    assert!(tx.insert_solution(&solution()).await.unwrap());
    assert!(!tx.insert_solution(&solution()).await.unwrap());
    assert!(tx.mark_solution_merged(PR).await.unwrap());
    assert!(!tx.mark_solution_merged(PR).await.unwrap());
    assert!(!tx.delete_solution(PR).await.unwrap());

    let stored = tx.solution(PR).await.unwrap().unwrap();
    assert!(stored.merged);
    assert_eq!(stored.author, "alice");
}

#[tokio::test]
async fn test_unmerged_solution_can_be_deleted() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let mut tx = db.begin().await.unwrap();
    tx.insert_solution(&solution()).await.unwrap();
    assert!(tx.delete_solution(PR).await.unwrap());
    assert!(tx.solution(PR).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delivery_round_trip() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    let delivery = Delivery {
        id: "72d3162e-cc78-11e3-81ab-4c9367dc0958".to_string(),
        event: "issue_comment.created".to_string(),
        publications: vec![Publication {
            stream: "bounty-stream".to_string(),
            data: r#"{"github_username":"alice"}"#.to_string(),
        }],
    };

    let mut tx = db.begin().await.unwrap();
    assert!(tx.delivery(&delivery.id).await.unwrap().is_none());
    tx.record_delivery(&delivery).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    assert_eq!(tx.delivery(&delivery.id).await.unwrap(), Some(delivery.clone()));
    assert!(tx.record_delivery(&delivery).await.is_err());
}

fn delivery(id: &str) -> Delivery {
    Delivery {
        id: id.to_string(),
        event: "pull_request.opened".to_string(),
        publications: Vec::new(),
    }
}

#[test]
fn test_expired_deliveries_pruned_on_open() {
    let dir = std::env::temp_dir().join(format!("alfred-prune-{}", uuid::Uuid::new_v4()));
    let path = dir.join("alfred.db");
    let rt = tokio::runtime::Runtime::new().unwrap();

    rt.block_on(async {
        let db = SqliteDatabase::new(&path).unwrap();
        let mut tx = db.begin().await.unwrap();
        tx.record_delivery(&delivery("old")).await.unwrap();
        tx.record_delivery(&delivery("recent")).await.unwrap();
        tx.commit().await.unwrap();

        let conn = db.conn.lock().await;
        let stale = Utc::now().timestamp() - (DELIVERY_RETENTION_DAYS + 1) * SECONDS_PER_DAY;
        conn.execute(
            "UPDATE processed_deliveries SET recorded_at = ?1 WHERE delivery_id = 'old'",
            params![stale],
        )
        .unwrap();
    });

    rt.block_on(async {
        let db = SqliteDatabase::new(&path).unwrap();
        let mut tx = db.begin().await.unwrap();
        assert!(tx.delivery("old").await.unwrap().is_none());
        assert!(tx.delivery("recent").await.unwrap().is_some());
    });

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_corrupt_tags_reported() {
    let db = SqliteDatabase::new_in_memory().unwrap();
    {
        let conn = db.conn.lock().await;
        conn.execute(
            "INSERT INTO issues (url, title, repo_url, tags, created_at)
             VALUES (?1, 't', ?2, 'not json', 0)",
            params![ISSUE, REPO],
        )
        .unwrap();
    }
    let mut tx = db.begin().await.unwrap();
    assert!(tx.issue(ISSUE).await.is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_bounty_balance_is_sum_of_adjustments(deltas in proptest::collection::vec(-1000i64..1000, 0..20)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let db = SqliteDatabase::new_in_memory().unwrap();
            let mut tx = db.begin().await.unwrap();
            tx.add_participant("alice").await.unwrap();
            for delta in &deltas {
                tx.adjust_bounty("alice", *delta).await.unwrap();
            }
            let alice = tx.participant("alice").await.unwrap().unwrap();
            prop_assert_eq!(alice.bounty, deltas.iter().sum::<i64>());
            Ok(())
        })?;
    }
}
