//! PostgreSQL adjacency-list comment store.
//!
//! One row per comment with a nullable self-referencing `parent_id`.
//! Identities come from a `BIGSERIAL`, timestamps from `clock_timestamp()`,
//! and the parent foreign key cascades deletes down reply subtrees.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//! - `DB_ENFORCE_FOREIGN_KEYS`: reference `users(id)` / `posts(id)` (default: false)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

use super::{CommentStore, StoreError};
use crate::config::env_or;
use crate::types::{AuthorId, Comment, CommentId, NewComment, PostId};

/// Statements creating the comment table; each runs on its own.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id          BIGSERIAL PRIMARY KEY,
        author_id   BIGINT NOT NULL,
        post_id     BIGINT NOT NULL,
        text        TEXT NOT NULL CHECK (btrim(text) <> ''),
        parent_id   BIGINT NULL REFERENCES comments(id) ON DELETE CASCADE ON UPDATE CASCADE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS comments_post_created_idx ON comments (post_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS comments_parent_idx ON comments (parent_id)",
    "CREATE INDEX IF NOT EXISTS comments_author_idx ON comments (author_id)",
];

/// Cascading references to the surrounding schema's users and posts.
const FOREIGN_KEYS: &str = r#"
    DO $$
    BEGIN
        IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'comments_author_fk') THEN
            ALTER TABLE comments ADD CONSTRAINT comments_author_fk
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE ON UPDATE CASCADE;
        END IF;
        IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'comments_post_fk') THEN
            ALTER TABLE comments ADD CONSTRAINT comments_post_fk
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE ON UPDATE CASCADE;
        END IF;
    END
    $$
"#;

const COMMENT_COLUMNS: &str = "id, author_id, post_id, text, parent_id, created_at";

/// Subtree delete seeded by a condition on `comments`.
///
/// `UNION` rather than `UNION ALL` so a corrupted parent cycle terminates.
fn subtree_delete_sql(seed_condition: &str) -> String {
    format!(
        r#"
        WITH RECURSIVE doomed AS (
            SELECT id FROM comments WHERE {seed_condition}
            UNION
            SELECT c.id FROM comments c JOIN doomed d ON c.parent_id = d.id
        )
        DELETE FROM comments WHERE id IN (SELECT id FROM doomed)
        "#
    )
}

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
    /// Add cascading foreign keys to `users(id)` and `posts(id)`.
    pub enforce_foreign_keys: bool,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/greenscape".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
            enforce_foreign_keys: env_or("DB_ENFORCE_FOREIGN_KEYS", false),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL comment store.
///
/// Every operation acquires a pooled connection for its own duration only.
#[derive(Clone)]
pub struct PostgresCommentStore {
    pool: PgPool,
    enforce_foreign_keys: bool,
}

impl PostgresCommentStore {
    /// Connect with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self::from_pool(pool, config.enforce_foreign_keys))
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, enforce_foreign_keys: bool) -> Self {
        Self {
            pool,
            enforce_foreign_keys,
        }
    }

    /// Create the comment table and indexes if missing.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        if self.enforce_foreign_keys {
            sqlx::query(FOREIGN_KEYS).execute(&self.pool).await?;
        }
        tracing::info!(foreign_keys = self.enforce_foreign_keys, "comment schema ready");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    /// Parse a comment from a database row.
    fn parse_comment_row(row: &PgRow) -> Result<Comment, sqlx::Error> {
        let parent_id: Option<i64> = row.try_get("parent_id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        Ok(Comment {
            id: CommentId::new(row.try_get("id")?),
            author_id: AuthorId::new(row.try_get("author_id")?),
            post_id: PostId::new(row.try_get("post_id")?),
            text: row.try_get("text")?,
            parent_id: parent_id.map(CommentId::new),
            created_at,
        })
    }

    async fn fetch_comments(&self, condition: &str, value: i64) -> Result<Vec<Comment>, StoreError> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE {condition} ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql).bind(value).fetch_all(&self.pool).await?;

        rows.iter()
            .map(Self::parse_comment_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    async fn delete_where(&self, seed_condition: &str, value: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(&subtree_delete_sql(seed_condition))
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CommentStore for PostgresCommentStore {
    async fn add_comment(&self, comment: NewComment) -> Result<CommentId, StoreError> {
        comment.validate()?;

        let mut tx = self.pool.begin().await?;

        if let Some(parent_id) = comment.parent_id {
            // Key-share lock keeps the parent from being deleted before commit.
            let parent_post: Option<i64> =
                sqlx::query_scalar("SELECT post_id FROM comments WHERE id = $1 FOR KEY SHARE")
                    .bind(parent_id.get())
                    .fetch_optional(&mut *tx)
                    .await?;

            match parent_post.map(PostId::new) {
                None => return Err(StoreError::ParentNotFound(parent_id)),
                Some(found) if found != comment.post_id => {
                    return Err(StoreError::ParentPostMismatch {
                        parent: parent_id,
                        expected: comment.post_id,
                        found,
                    })
                }
                Some(_) => {}
            }
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO comments (author_id, post_id, text, parent_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(comment.author_id.get())
        .bind(comment.post_id.get())
        .bind(&comment.text)
        .bind(comment.parent_id.map(|p| p.get()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let id = CommentId::new(id);
        tracing::debug!(comment_id = %id, post_id = %comment.post_id, "comment added");
        Ok(id)
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        Ok(self.fetch_comments("id = $1", id.get()).await?.pop())
    }

    async fn get_parent(&self, id: CommentId) -> Result<Option<CommentId>, StoreError> {
        let parent: Option<Option<i64>> =
            sqlx::query_scalar("SELECT parent_id FROM comments WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(parent.flatten().map(CommentId::new))
    }

    async fn get_children(&self, id: CommentId) -> Result<Vec<Comment>, StoreError> {
        self.fetch_comments("parent_id = $1", id.get()).await
    }

    async fn get_all_comments_for_post(&self, post_id: PostId) -> Result<Vec<Comment>, StoreError> {
        self.fetch_comments("post_id = $1", post_id.get()).await
    }

    async fn next_available_id(&self) -> Result<CommentId, StoreError> {
        let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM comments")
            .fetch_one(&self.pool)
            .await?;
        Ok(CommentId::new(next))
    }

    async fn count_comments(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn list_posts_with_comments(&self) -> Result<Vec<PostId>, StoreError> {
        let posts: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT post_id FROM comments ORDER BY post_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(posts.into_iter().map(PostId::new).collect())
    }

    async fn list_authors(&self) -> Result<Vec<AuthorId>, StoreError> {
        let sql = if self.enforce_foreign_keys {
            "SELECT id FROM users ORDER BY id"
        } else {
            "SELECT DISTINCT author_id FROM comments ORDER BY author_id"
        };
        let authors: Vec<i64> = sqlx::query_scalar(sql).fetch_all(&self.pool).await?;
        Ok(authors.into_iter().map(AuthorId::new).collect())
    }

    async fn list_comment_ids(&self) -> Result<Vec<CommentId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM comments ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(CommentId::new).collect())
    }

    async fn delete_comment(&self, id: CommentId) -> Result<u64, StoreError> {
        let removed = self.delete_where("id = $1", id.get()).await?;
        tracing::debug!(comment_id = %id, removed, "comment subtree deleted");
        Ok(removed)
    }

    async fn delete_post(&self, post_id: PostId) -> Result<u64, StoreError> {
        let removed = self.delete_where("post_id = $1", post_id.get()).await?;
        tracing::debug!(post_id = %post_id, removed, "post comments deleted");
        Ok(removed)
    }

    async fn delete_author(&self, author_id: AuthorId) -> Result<u64, StoreError> {
        let removed = self.delete_where("author_id = $1", author_id.get()).await?;
        tracing::debug!(author_id = %author_id, removed, "author comments deleted");
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM comments").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtree_delete_walks_parent_links() {
        let sql = subtree_delete_sql("post_id = $1");
        assert!(sql.contains("WITH RECURSIVE doomed"));
        assert!(sql.contains("WHERE post_id = $1"));
        assert!(sql.contains("c.parent_id = d.id"));
        assert!(!sql.contains("UNION ALL"));
    }

    #[test]
    fn test_schema_cascades_parent_deletes() {
        assert!(SCHEMA[0].contains("REFERENCES comments(id) ON DELETE CASCADE"));
        assert!(SCHEMA.iter().any(|s| s.contains("(post_id, created_at, id)")));
    }
}
