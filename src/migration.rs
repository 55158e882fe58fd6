//! One-time import of legacy flat comments into the threaded store.
//!
//! The legacy table holds `(author, post, text)` rows with no reply
//! structure. Each row becomes a root comment. Import runs only against an
//! empty store, which is what makes repeated startup safe; there is no
//! rollback, and a failed import leaves the rows written so far in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::{CommentStore, StoreError};
use crate::types::{AuthorId, NewComment, PostId};

/// A row of the legacy, un-threaded comment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyComment {
    /// Who wrote it.
    pub author_id: AuthorId,
    /// Post it was left on.
    pub post_id: PostId,
    /// Body text.
    pub text: String,
}

impl LegacyComment {
    /// Create a legacy row.
    pub fn new(author_id: AuthorId, post_id: PostId, text: impl Into<String>) -> Self {
        Self {
            author_id,
            post_id,
            text: text.into(),
        }
    }

    fn into_root(self) -> NewComment {
        NewComment::root(self.author_id, self.post_id, self.text)
    }
}

/// Where legacy rows come from.
#[async_trait]
pub trait LegacyCommentSource: Send + Sync {
    /// Every legacy row, in the table's natural order.
    async fn fetch_all(&self) -> Result<Vec<LegacyComment>, StoreError>;
}

/// Legacy rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLegacySource {
    rows: Vec<LegacyComment>,
}

impl InMemoryLegacySource {
    /// Create a source over the given rows.
    pub fn new(rows: Vec<LegacyComment>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl LegacyCommentSource for InMemoryLegacySource {
    async fn fetch_all(&self) -> Result<Vec<LegacyComment>, StoreError> {
        Ok(self.rows.clone())
    }
}

/// Legacy rows read from a PostgreSQL table.
#[cfg(feature = "postgres")]
pub struct PostgresLegacySource {
    pool: sqlx::PgPool,
    table: String,
}

#[cfg(feature = "postgres")]
impl PostgresLegacySource {
    /// Read from `table`, which must have `legacy_id, author_id, post_id, text` columns.
    ///
    /// The table name is checked to be a plain identifier since it is
    /// interpolated into the query.
    pub fn new(pool: sqlx::PgPool, table: impl Into<String>) -> Result<Self, StoreError> {
        let table = table.into();
        let plain = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !plain {
            return Err(StoreError::Backend(format!("invalid legacy table name: {table:?}")));
        }
        Ok(Self { pool, table })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl LegacyCommentSource for PostgresLegacySource {
    async fn fetch_all(&self) -> Result<Vec<LegacyComment>, StoreError> {
        let sql = format!(
            "SELECT author_id, post_id, text FROM {} ORDER BY legacy_id",
            self.table
        );
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(author, post, text)| LegacyComment::new(AuthorId::new(author), PostId::new(post), text))
            .collect())
    }
}

/// Result of a migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Store already held comments; nothing imported.
    Skipped {
        /// Comments found in the store.
        existing: u64,
    },
    /// Every legacy row imported.
    Completed {
        /// Rows imported.
        imported: u64,
    },
}

/// Error type for migration.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Store or legacy table could not be read.
    #[error("Could not read migration input: {0}")]
    Source(#[source] StoreError),
    /// An insert failed; rows before it stay imported.
    #[error("Migration stopped at legacy row {failed_row} after importing {imported} rows: {source}")]
    Partial {
        /// Rows imported before the failure.
        imported: u64,
        /// Position of the failing row in the legacy order.
        failed_row: usize,
        /// Underlying failure.
        #[source]
        source: StoreError,
    },
}

/// Import legacy rows as root comments if the store is empty.
pub async fn migrate_if_empty<S, L>(store: &S, source: &L) -> Result<MigrationOutcome, MigrationError>
where
    S: CommentStore + ?Sized,
    L: LegacyCommentSource + ?Sized,
{
    let existing = store.count_comments().await.map_err(MigrationError::Source)?;
    if existing > 0 {
        tracing::info!(existing, "comment store not empty, skipping legacy migration");
        return Ok(MigrationOutcome::Skipped { existing });
    }

    let rows = source.fetch_all().await.map_err(MigrationError::Source)?;
    tracing::info!(rows = rows.len(), "migrating legacy comments");

    let mut imported = 0u64;
    for (position, row) in rows.into_iter().enumerate() {
        if let Err(source) = store.add_comment(row.into_root()).await {
            tracing::error!(
                failed_row = position,
                imported,
                error = %source,
                "legacy migration stopped"
            );
            return Err(MigrationError::Partial {
                imported,
                failed_row: position,
                source,
            });
        }
        imported += 1;
    }

    tracing::info!(imported, "legacy migration completed");
    Ok(MigrationOutcome::Completed { imported })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCommentStore;

    fn legacy_rows(n: i64) -> Vec<LegacyComment> {
        (1..=n)
            .map(|i| LegacyComment::new(AuthorId::new(i % 7 + 1), PostId::new(i % 3 + 1), format!("legacy {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_migrates_into_empty_store() {
        let store = InMemoryCommentStore::new();
        let source = InMemoryLegacySource::new(legacy_rows(20));

        let outcome = migrate_if_empty(&store, &source).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Completed { imported: 20 });
        assert_eq!(store.count_comments().await.unwrap(), 20);

        for id in store.list_comment_ids().await.unwrap() {
            assert_eq!(store.get_parent(id).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let store = InMemoryCommentStore::new();
        let source = InMemoryLegacySource::new(legacy_rows(20));

        migrate_if_empty(&store, &source).await.unwrap();
        let outcome = migrate_if_empty(&store, &source).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::Skipped { existing: 20 });
        assert_eq!(store.count_comments().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_preserves_row_order_and_fields() {
        let store = InMemoryCommentStore::new();
        let source = InMemoryLegacySource::new(vec![
            LegacyComment::new(AuthorId::new(4), PostId::new(2), "first"),
            LegacyComment::new(AuthorId::new(5), PostId::new(2), "second"),
        ]);
        migrate_if_empty(&store, &source).await.unwrap();

        let comments = store.get_all_comments_for_post(PostId::new(2)).await.unwrap();
        let texts: Vec<&str> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(comments[1].author_id, AuthorId::new(5));
    }

    #[tokio::test]
    async fn test_partial_failure_is_surfaced() {
        let store = InMemoryCommentStore::new();
        let mut rows = legacy_rows(5);
        rows[3].text = String::new();
        let source = InMemoryLegacySource::new(rows);

        let err = migrate_if_empty(&store, &source).await.unwrap_err();
        match err {
            MigrationError::Partial { imported, failed_row, .. } => {
                assert_eq!(imported, 3);
                assert_eq!(failed_row, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count_comments().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_legacy_table() {
        let store = InMemoryCommentStore::new();
        let outcome = migrate_if_empty(&store, &InMemoryLegacySource::default()).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Completed { imported: 0 });
    }
}
