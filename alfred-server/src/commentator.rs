//! Resolves the role of a comment author.

use alfred_core::{normalize_login, Commentator};
use tracing::debug;

use crate::store::{Database, StoreError};

/// Classify `username` for `repo_url`.
///
/// Maintainers win over participants: a maintainer who also registered as a
/// participant resolves as [`Commentator::Maintainer`]. Logins match
/// case-insensitively.
pub async fn resolve_commentator(
    db: &dyn Database,
    repo_url: &str,
    username: &str,
) -> Result<Commentator, StoreError> {
    let username = normalize_login(username);
    let mut tx = db.begin().await?;

    let role = if tx
        .maintainers(repo_url)
        .await?
        .iter()
        .any(|m| *m == username)
    {
        Commentator::Maintainer
    } else if tx.participant_exists(&username).await? {
        Commentator::Participant
    } else {
        Commentator::Unknown
    };

    tx.rollback().await?;

    debug!("Resolved {} on {} as {}", username, repo_url, role);
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDatabase;

    const REPO: &str = "https://github.com/acme/widgets";

    async fn seeded() -> InMemoryDatabase {
        let db = InMemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        tx.upsert_repository(REPO, None).await.unwrap();
        tx.add_maintainer(REPO, "maya").await.unwrap();
        tx.add_participant("maya").await.unwrap();
        tx.add_participant("pat").await.unwrap();
        tx.commit().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_maintainer_takes_precedence_over_participant() {
        let db = seeded().await;
        assert_eq!(
            resolve_commentator(&db, REPO, "maya").await.unwrap(),
            Commentator::Maintainer
        );
    }

    #[tokio::test]
    async fn test_participant() {
        let db = seeded().await;
        assert_eq!(
            resolve_commentator(&db, REPO, "pat").await.unwrap(),
            Commentator::Participant
        );
    }

    #[tokio::test]
    async fn test_unknown() {
        let db = seeded().await;
        assert_eq!(
            resolve_commentator(&db, REPO, "stranger").await.unwrap(),
            Commentator::Unknown
        );
    }

    #[tokio::test]
    async fn test_maintainer_of_another_repository_is_only_a_participant() {
        let db = seeded().await;
        assert_eq!(
            resolve_commentator(&db, "https://github.com/acme/other", "maya")
                .await
                .unwrap(),
            Commentator::Participant
        );
    }

    #[tokio::test]
    async fn test_login_match_ignores_case() {
        let db = seeded().await;
        assert_eq!(
            resolve_commentator(&db, REPO, "Maya").await.unwrap(),
            Commentator::Maintainer
        );
        assert_eq!(
            resolve_commentator(&db, REPO, "PAT").await.unwrap(),
            Commentator::Participant
        );
    }
}
