//! Runtime backend selection.

use std::fmt;

use async_trait::async_trait;

use super::{CommentStore, InMemoryCommentStore, StoreError};
use crate::config::{BackendKind, StoreConfig};
use crate::types::{AuthorId, Comment, CommentId, NewComment, PostId};

#[cfg(feature = "graph")]
use super::Neo4jCommentStore;
#[cfg(feature = "postgres")]
use super::PostgresCommentStore;

/// One of the compiled-in comment stores, chosen at startup.
#[derive(Clone)]
pub enum CommentBackend {
    /// Process-local store.
    Memory(InMemoryCommentStore),
    /// PostgreSQL adjacency-list store.
    #[cfg(feature = "postgres")]
    Postgres(PostgresCommentStore),
    /// Neo4j graph store.
    #[cfg(feature = "graph")]
    Graph(Neo4jCommentStore),
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Self::Memory($store) => $call,
            #[cfg(feature = "postgres")]
            Self::Postgres($store) => $call,
            #[cfg(feature = "graph")]
            Self::Graph($store) => $call,
        }
    };
}

impl CommentBackend {
    /// Connect to the configured backend and prepare its schema.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        tracing::info!(backend = %config.backend, "connecting comment store");

        match config.backend {
            BackendKind::Memory => Ok(Self::Memory(InMemoryCommentStore::new())),
            #[cfg(feature = "postgres")]
            BackendKind::Postgres => {
                let store = PostgresCommentStore::new(config.postgres.clone()).await?;
                store.initialize().await?;
                Ok(Self::Postgres(store))
            }
            #[cfg(feature = "graph")]
            BackendKind::Graph => {
                let store = Neo4jCommentStore::new(config.graph.clone()).await?;
                store.initialize().await?;
                Ok(Self::Graph(store))
            }
            #[allow(unreachable_patterns)]
            other => Err(StoreError::Backend(format!(
                "backend `{other}` is not compiled into this build"
            ))),
        }
    }

    /// Which backend this is.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Memory(_) => BackendKind::Memory,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => BackendKind::Postgres,
            #[cfg(feature = "graph")]
            Self::Graph(_) => BackendKind::Graph,
        }
    }

    /// Check if the underlying database is reachable.
    pub async fn is_healthy(&self) -> bool {
        match self {
            Self::Memory(_) => true,
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => store.is_healthy().await,
            #[cfg(feature = "graph")]
            Self::Graph(store) => store.is_healthy().await,
        }
    }

    /// PostgreSQL pool, when running against PostgreSQL.
    #[cfg(feature = "postgres")]
    pub fn postgres_pool(&self) -> Option<&sqlx::PgPool> {
        match self {
            Self::Postgres(store) => Some(store.pool()),
            _ => None,
        }
    }

    /// Connection pool statistics, when running against PostgreSQL.
    #[cfg(feature = "postgres")]
    pub fn pool_stats(&self) -> Option<super::PoolStats> {
        match self {
            Self::Postgres(store) => Some(store.pool_stats()),
            _ => None,
        }
    }
}

impl Default for CommentBackend {
    fn default() -> Self {
        Self::Memory(InMemoryCommentStore::new())
    }
}

impl fmt::Debug for CommentBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommentBackend").field(&self.kind()).finish()
    }
}

#[async_trait]
impl CommentStore for CommentBackend {
    async fn add_comment(&self, comment: NewComment) -> Result<CommentId, StoreError> {
        dispatch!(self, store => store.add_comment(comment).await)
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        dispatch!(self, store => store.get_comment(id).await)
    }

    async fn get_parent(&self, id: CommentId) -> Result<Option<CommentId>, StoreError> {
        dispatch!(self, store => store.get_parent(id).await)
    }

    async fn get_children(&self, id: CommentId) -> Result<Vec<Comment>, StoreError> {
        dispatch!(self, store => store.get_children(id).await)
    }

    async fn get_all_comments_for_post(&self, post_id: PostId) -> Result<Vec<Comment>, StoreError> {
        dispatch!(self, store => store.get_all_comments_for_post(post_id).await)
    }

    async fn next_available_id(&self) -> Result<CommentId, StoreError> {
        dispatch!(self, store => store.next_available_id().await)
    }

    async fn count_comments(&self) -> Result<u64, StoreError> {
        dispatch!(self, store => store.count_comments().await)
    }

    async fn list_posts_with_comments(&self) -> Result<Vec<PostId>, StoreError> {
        dispatch!(self, store => store.list_posts_with_comments().await)
    }

    async fn list_authors(&self) -> Result<Vec<AuthorId>, StoreError> {
        dispatch!(self, store => store.list_authors().await)
    }

    async fn list_comment_ids(&self) -> Result<Vec<CommentId>, StoreError> {
        dispatch!(self, store => store.list_comment_ids().await)
    }

    async fn delete_comment(&self, id: CommentId) -> Result<u64, StoreError> {
        dispatch!(self, store => store.delete_comment(id).await)
    }

    async fn delete_post(&self, post_id: PostId) -> Result<u64, StoreError> {
        dispatch!(self, store => store.delete_post(post_id).await)
    }

    async fn delete_author(&self, author_id: AuthorId) -> Result<u64, StoreError> {
        dispatch!(self, store => store.delete_author(author_id).await)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        dispatch!(self, store => store.clear_all().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let backend = CommentBackend::connect(&StoreConfig::memory()).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::Memory);
        assert!(backend.is_healthy().await);

        let id = backend
            .add_comment(NewComment::root(AuthorId::new(1), PostId::new(1), "hello"))
            .await
            .unwrap();
        assert_eq!(id, CommentId::FIRST);
        assert_eq!(backend.count_comments().await.unwrap(), 1);
    }

    #[cfg(not(feature = "graph"))]
    #[tokio::test]
    async fn test_missing_feature_is_reported() {
        let mut config = StoreConfig::memory();
        config.backend = BackendKind::Graph;
        let err = CommentBackend::connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("not compiled"));
    }
}
