//! Neo4j comment store.
//!
//! Graph layout:
//!
//! ```text
//! (:User {id})-[:AUTHORED_BY]->(:Comment {id, text, created_at})-[:BELONGS_TO]->(:Post {id})
//! (:Comment)-[:REPLIES_TO]->(:Comment)
//! (:CommentSequence {name: 'comment', value})
//! ```
//!
//! Neo4j has no auto-increment, so identities come from the sequence node.
//! Incrementing it, checking the parent and creating the comment happen in
//! one Cypher statement; the write lock taken on the sequence node orders
//! concurrent writers, and a uniqueness constraint on `Comment.id` backs it.
//! `created_at` is stored as epoch milliseconds.
//!
//! ## Configuration
//!
//! - `NEO4J_URI`: Bolt address (default: 127.0.0.1:7687)
//! - `NEO4J_USER`: user name (default: neo4j)
//! - `NEO4J_PASSWORD`: password (default: neo4j)
//! - `NEO4J_MAX_CONNECTIONS`: pool size (default: 16)
//! - `NEO4J_FETCH_SIZE`: rows per fetch (default: 500)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use neo4rs::{query, ConfigBuilder, Graph, Query, Row};

use super::{CommentStore, StoreError};
use crate::config::env_or;
use crate::types::{AuthorId, Comment, CommentId, NewComment, PostId};

const SCHEMA: &[&str] = &[
    "CREATE CONSTRAINT comment_id_unique IF NOT EXISTS FOR (c:Comment) REQUIRE c.id IS UNIQUE",
    "CREATE CONSTRAINT post_id_unique IF NOT EXISTS FOR (p:Post) REQUIRE p.id IS UNIQUE",
    "CREATE CONSTRAINT user_id_unique IF NOT EXISTS FOR (u:User) REQUIRE u.id IS UNIQUE",
    "CREATE CONSTRAINT comment_sequence_unique IF NOT EXISTS FOR (s:CommentSequence) REQUIRE s.name IS UNIQUE",
];

/// Creates the sequence node, never letting it fall behind existing comments.
const SEED_SEQUENCE: &str = r#"
    MERGE (s:CommentSequence {name: 'comment'})
    ON CREATE SET s.value = 0
    WITH s
    OPTIONAL MATCH (c:Comment)
    WITH s, coalesce(max(c.id), 0) AS max_id
    SET s.value = CASE WHEN max_id > s.value THEN max_id ELSE s.value END
    RETURN s.value AS value
"#;

/// Allocates an identity and creates the comment with its edges.
///
/// Yields no row when the parent is missing or belongs to another post.
const CREATE_COMMENT: &str = r#"
    OPTIONAL MATCH (parent:Comment {id: $parent_id})-[:BELONGS_TO]->(parent_post:Post)
    WITH parent, parent_post
    WHERE $parent_id IS NULL OR (parent IS NOT NULL AND parent_post.id = $post_id)
    MERGE (seq:CommentSequence {name: 'comment'})
    ON CREATE SET seq.value = 0
    SET seq.value = seq.value + 1
    WITH parent, seq.value AS id
    MERGE (u:User {id: $author_id})
    MERGE (p:Post {id: $post_id})
    CREATE (c:Comment {id: id, text: $text, created_at: timestamp()})
    CREATE (u)-[:AUTHORED_BY]->(c)
    CREATE (c)-[:BELONGS_TO]->(p)
    FOREACH (_ IN CASE WHEN parent IS NULL THEN [] ELSE [1] END |
        CREATE (c)-[:REPLIES_TO]->(parent))
    RETURN id
"#;

const PARENT_POST: &str = r#"
    MATCH (parent:Comment {id: $parent_id})-[:BELONGS_TO]->(p:Post)
    RETURN p.id AS post_id
"#;

/// Projection shared by every comment read; `c` and `p` must be bound.
const COMMENT_PROJECTION: &str = r#"
    OPTIONAL MATCH (u:User)-[:AUTHORED_BY]->(c)
    OPTIONAL MATCH (c)-[:REPLIES_TO]->(parent:Comment)
    RETURN c.id AS id, u.id AS author_id, p.id AS post_id, c.text AS text,
           parent.id AS parent_id, c.created_at AS created_at
    ORDER BY created_at, id
"#;

/// Deletes the matched `root` comments with every reply beneath them.
fn subtree_delete_cypher(seed: &str) -> String {
    format!(
        r#"
        {seed}
        OPTIONAL MATCH (root)<-[:REPLIES_TO*0..]-(c:Comment)
        WITH collect(DISTINCT c) AS doomed
        FOREACH (n IN doomed | DETACH DELETE n)
        RETURN size(doomed) AS removed
        "#
    )
}

/// Configuration for the Neo4j connection pool.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Bolt address.
    pub uri: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Maximum pooled connections.
    pub max_connections: usize,
    /// Rows pulled per fetch.
    pub fetch_size: usize,
}

impl GraphConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            uri: std::env::var("NEO4J_URI").unwrap_or_else(|_| "127.0.0.1:7687".to_string()),
            user: std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "neo4j".to_string()),
            max_connections: env_or("NEO4J_MAX_CONNECTIONS", 16),
            fetch_size: env_or("NEO4J_FETCH_SIZE", 500),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Comment row as returned by [`COMMENT_PROJECTION`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct GraphCommentRecord {
    id: i64,
    author_id: Option<i64>,
    post_id: i64,
    text: String,
    parent_id: Option<i64>,
    created_at_ms: i64,
}

impl GraphCommentRecord {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get("id").map_err(StoreError::backend)?,
            author_id: row.get("author_id").map_err(StoreError::backend)?,
            post_id: row.get("post_id").map_err(StoreError::backend)?,
            text: row.get("text").map_err(StoreError::backend)?,
            parent_id: row.get("parent_id").map_err(StoreError::backend)?,
            created_at_ms: row.get("created_at").map_err(StoreError::backend)?,
        })
    }

    fn into_comment(self) -> Result<Comment, StoreError> {
        let author_id = self
            .author_id
            .ok_or_else(|| StoreError::Backend(format!("comment {} has no author", self.id)))?;
        let created_at = Utc
            .timestamp_millis_opt(self.created_at_ms)
            .single()
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "comment {} has invalid timestamp {}",
                    self.id, self.created_at_ms
                ))
            })?;

        Ok(Comment {
            id: CommentId::new(self.id),
            author_id: AuthorId::new(author_id),
            post_id: PostId::new(self.post_id),
            text: self.text,
            parent_id: self.parent_id.map(CommentId::new),
            created_at,
        })
    }
}

/// Neo4j comment store.
#[derive(Clone)]
pub struct Neo4jCommentStore {
    graph: Arc<Graph>,
}

impl Neo4jCommentStore {
    /// Connect with the given configuration.
    pub async fn new(config: GraphConfig) -> Result<Self, StoreError> {
        tracing::info!(
            uri = %config.uri,
            max_connections = config.max_connections,
            fetch_size = config.fetch_size,
            "Connecting to Neo4j"
        );

        let neo4j_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .max_connections(config.max_connections)
            .fetch_size(config.fetch_size)
            .build()?;
        let graph = Graph::connect(neo4j_config).await?;

        Ok(Self::from_graph(Arc::new(graph)))
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(GraphConfig::from_env()).await
    }

    /// Wrap an existing connection pool.
    pub fn from_graph(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    /// Create constraints and the identity sequence if missing.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            self.graph.run(query(statement)).await?;
        }
        let value = self.fetch_one_i64(query(SEED_SEQUENCE), "value").await?;
        tracing::info!(sequence = ?value, "graph comment schema ready");
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        matches!(self.fetch_one_i64(query("RETURN 1 AS ok"), "ok").await, Ok(Some(1)))
    }

    async fn fetch_i64s(&self, q: Query, column: &str) -> Result<Vec<i64>, StoreError> {
        let mut stream = self.graph.execute(q).await?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await? {
            out.push(row.get::<i64>(column).map_err(StoreError::backend)?);
        }
        Ok(out)
    }

    async fn fetch_one_i64(&self, q: Query, column: &str) -> Result<Option<i64>, StoreError> {
        let mut stream = self.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(Some(row.get::<i64>(column).map_err(StoreError::backend)?)),
            None => Ok(None),
        }
    }

    async fn fetch_comments(&self, pattern: &str, value: i64) -> Result<Vec<Comment>, StoreError> {
        let cypher = format!("{pattern}\n{COMMENT_PROJECTION}");
        let mut stream = self.graph.execute(query(&cypher).param("value", value)).await?;

        let mut out = Vec::new();
        while let Some(row) = stream.next().await? {
            out.push(GraphCommentRecord::from_row(&row)?.into_comment()?);
        }
        Ok(out)
    }

    async fn delete_subtrees(&self, seed: &str, value: i64) -> Result<u64, StoreError> {
        let cypher = subtree_delete_cypher(seed);
        let removed = self
            .fetch_one_i64(query(&cypher).param("value", value), "removed")
            .await?;
        Ok(removed.unwrap_or(0) as u64)
    }

    /// Explain why `CREATE_COMMENT` produced no row.
    async fn rejected_parent(&self, comment: &NewComment, parent_id: CommentId) -> StoreError {
        let found = self
            .fetch_one_i64(query(PARENT_POST).param("parent_id", parent_id.get()), "post_id")
            .await;
        match found {
            Ok(Some(post)) if post != comment.post_id.get() => StoreError::ParentPostMismatch {
                parent: parent_id,
                expected: comment.post_id,
                found: PostId::new(post),
            },
            Ok(_) => StoreError::ParentNotFound(parent_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl CommentStore for Neo4jCommentStore {
    async fn add_comment(&self, comment: NewComment) -> Result<CommentId, StoreError> {
        comment.validate()?;

        let q = query(CREATE_COMMENT)
            .param("author_id", comment.author_id.get())
            .param("post_id", comment.post_id.get())
            .param("text", comment.text.as_str())
            .param("parent_id", comment.parent_id.map(|p| p.get()));

        match self.fetch_one_i64(q, "id").await? {
            Some(id) => {
                let id = CommentId::new(id);
                tracing::debug!(comment_id = %id, post_id = %comment.post_id, "comment added");
                Ok(id)
            }
            None => match comment.parent_id {
                Some(parent_id) => Err(self.rejected_parent(&comment, parent_id).await),
                None => Err(StoreError::Backend("comment creation returned no identity".to_string())),
            },
        }
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        let pattern = "MATCH (c:Comment {id: $value})-[:BELONGS_TO]->(p:Post)";
        Ok(self.fetch_comments(pattern, id.get()).await?.pop())
    }

    async fn get_parent(&self, id: CommentId) -> Result<Option<CommentId>, StoreError> {
        let q = query("MATCH (:Comment {id: $id})-[:REPLIES_TO]->(parent:Comment) RETURN parent.id AS parent_id")
            .param("id", id.get());
        Ok(self.fetch_one_i64(q, "parent_id").await?.map(CommentId::new))
    }

    async fn get_children(&self, id: CommentId) -> Result<Vec<Comment>, StoreError> {
        let pattern =
            "MATCH (c:Comment)-[:REPLIES_TO]->(:Comment {id: $value})\nMATCH (c)-[:BELONGS_TO]->(p:Post)";
        self.fetch_comments(pattern, id.get()).await
    }

    async fn get_all_comments_for_post(&self, post_id: PostId) -> Result<Vec<Comment>, StoreError> {
        let pattern = "MATCH (c:Comment)-[:BELONGS_TO]->(p:Post {id: $value})";
        self.fetch_comments(pattern, post_id.get()).await
    }

    async fn next_available_id(&self) -> Result<CommentId, StoreError> {
        let next = self
            .fetch_one_i64(
                query("MATCH (c:Comment) RETURN coalesce(max(c.id), 0) + 1 AS next"),
                "next",
            )
            .await?;
        Ok(next.map(CommentId::new).unwrap_or(CommentId::FIRST))
    }

    async fn count_comments(&self) -> Result<u64, StoreError> {
        let total = self
            .fetch_one_i64(query("MATCH (c:Comment) RETURN count(c) AS total"), "total")
            .await?;
        Ok(total.unwrap_or(0) as u64)
    }

    async fn list_posts_with_comments(&self) -> Result<Vec<PostId>, StoreError> {
        let ids = self
            .fetch_i64s(
                query("MATCH (:Comment)-[:BELONGS_TO]->(p:Post) RETURN DISTINCT p.id AS id ORDER BY id"),
                "id",
            )
            .await?;
        Ok(ids.into_iter().map(PostId::new).collect())
    }

    async fn list_authors(&self) -> Result<Vec<AuthorId>, StoreError> {
        let ids = self
            .fetch_i64s(query("MATCH (u:User) RETURN u.id AS id ORDER BY id"), "id")
            .await?;
        Ok(ids.into_iter().map(AuthorId::new).collect())
    }

    async fn list_comment_ids(&self) -> Result<Vec<CommentId>, StoreError> {
        let ids = self
            .fetch_i64s(query("MATCH (c:Comment) RETURN c.id AS id ORDER BY id"), "id")
            .await?;
        Ok(ids.into_iter().map(CommentId::new).collect())
    }

    async fn delete_comment(&self, id: CommentId) -> Result<u64, StoreError> {
        let removed = self
            .delete_subtrees("OPTIONAL MATCH (root:Comment {id: $value})", id.get())
            .await?;
        tracing::debug!(comment_id = %id, removed, "comment subtree deleted");
        Ok(removed)
    }

    async fn delete_post(&self, post_id: PostId) -> Result<u64, StoreError> {
        let removed = self
            .delete_subtrees(
                "OPTIONAL MATCH (root:Comment)-[:BELONGS_TO]->(:Post {id: $value})",
                post_id.get(),
            )
            .await?;
        tracing::debug!(post_id = %post_id, removed, "post comments deleted");
        Ok(removed)
    }

    async fn delete_author(&self, author_id: AuthorId) -> Result<u64, StoreError> {
        let removed = self
            .delete_subtrees(
                "OPTIONAL MATCH (:User {id: $value})-[:AUTHORED_BY]->(root:Comment)",
                author_id.get(),
            )
            .await?;
        self.graph
            .run(query("MATCH (u:User {id: $id}) DETACH DELETE u").param("id", author_id.get()))
            .await?;
        tracing::debug!(author_id = %author_id, removed, "author comments deleted");
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.graph.run(query("MATCH (c:Comment) DETACH DELETE c")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> GraphCommentRecord {
        GraphCommentRecord {
            id: 7,
            author_id: Some(3),
            post_id: 24,
            text: "Water only when the soil is dry.".to_string(),
            parent_id: Some(2),
            created_at_ms: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_record_into_comment() {
        let comment = record().into_comment().unwrap();
        assert_eq!(comment.id, CommentId::new(7));
        assert_eq!(comment.parent_id, Some(CommentId::new(2)));
        assert_eq!(comment.created_at.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_record_without_author_is_backend_error() {
        let mut broken = record();
        broken.author_id = None;
        assert!(broken.into_comment().unwrap_err().is_connectivity());
    }

    #[test]
    fn test_subtree_delete_includes_root() {
        let cypher = subtree_delete_cypher("OPTIONAL MATCH (root:Comment {id: $value})");
        assert!(cypher.contains("[:REPLIES_TO*0..]"));
        assert!(cypher.contains("DETACH DELETE n"));
    }

    #[test]
    fn test_create_statement_allocates_in_one_step() {
        let seq = CREATE_COMMENT.find("seq.value + 1").unwrap();
        let create = CREATE_COMMENT.find("CREATE (c:Comment").unwrap();
        let guard = CREATE_COMMENT.find("WHERE $parent_id IS NULL").unwrap();
        assert!(guard < seq && seq < create);
    }
}
