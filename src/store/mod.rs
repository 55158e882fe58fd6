//! Comment storage backends.
//!
//! Every backend persists the same logical records (identity, author, post,
//! optional parent, text, timestamp) and answers the same queries in the
//! same `(created_at, id)` order, so the assembler cannot tell them apart.

pub mod backend;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "graph")]
pub mod graph;

use async_trait::async_trait;

use crate::types::{AuthorId, Comment, CommentId, NewComment, PostId, ValidationError};

/// Error type shared by all comment stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Request rejected before any write.
    #[error("Invalid comment: {0}")]
    Validation(#[from] ValidationError),
    /// Reply to a comment that does not exist.
    #[error("Parent comment not found: {0}")]
    ParentNotFound(CommentId),
    /// Reply to a comment of another post.
    #[error("Parent comment {parent} belongs to post {found}, not {expected}")]
    ParentPostMismatch {
        /// The referenced parent.
        parent: CommentId,
        /// Post of the new comment.
        expected: PostId,
        /// Post the parent actually belongs to.
        found: PostId,
    },
    /// Backend failure that is not a database driver error.
    #[error("Backend error: {0}")]
    Backend(String),
    /// Relational database error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Graph database error.
    #[cfg(feature = "graph")]
    #[error("Graph database error: {0}")]
    Graph(#[from] neo4rs::Error),
}

impl StoreError {
    /// Create a backend error from any error type.
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    /// Whether the failure came from the backing database rather than the request.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Backend(_) => true,
            #[cfg(feature = "postgres")]
            Self::Database(_) => true,
            #[cfg(feature = "graph")]
            Self::Graph(_) => true,
            _ => false,
        }
    }

    /// Whether the request itself was at fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::ParentNotFound(_) | Self::ParentPostMismatch { .. }
        )
    }
}

/// Capability interface of a comment store.
///
/// Implementations must:
/// - assign identity and timestamp atomically inside `add_comment`
/// - reject replies to unknown parents and to parents of another post
/// - return comment lists ordered by `(created_at, id)` ascending
/// - treat unknown ids and posts as empty results, never as errors
/// - delete reply subtrees together with the comment they hang from
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Persist a new comment and return its identity.
    async fn add_comment(&self, comment: NewComment) -> Result<CommentId, StoreError>;

    /// Fetch a comment by identity.
    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>, StoreError>;

    /// Parent of a comment; `None` for roots and unknown ids.
    async fn get_parent(&self, id: CommentId) -> Result<Option<CommentId>, StoreError>;

    /// Direct replies of a comment.
    async fn get_children(&self, id: CommentId) -> Result<Vec<Comment>, StoreError>;

    /// Every comment of a post.
    async fn get_all_comments_for_post(&self, post_id: PostId) -> Result<Vec<Comment>, StoreError>;

    /// `max(id) + 1`, or 1 for an empty store.
    ///
    /// Informational only. Writers never pre-allocate with it.
    async fn next_available_id(&self) -> Result<CommentId, StoreError>;

    /// Total number of comments.
    async fn count_comments(&self) -> Result<u64, StoreError>;

    /// Posts with at least one comment, ascending.
    async fn list_posts_with_comments(&self) -> Result<Vec<PostId>, StoreError>;

    /// Users known to the store, ascending.
    async fn list_authors(&self) -> Result<Vec<AuthorId>, StoreError>;

    /// Every comment identity, ascending.
    async fn list_comment_ids(&self) -> Result<Vec<CommentId>, StoreError>;

    /// Delete a comment and its whole reply subtree. Returns the number removed.
    async fn delete_comment(&self, id: CommentId) -> Result<u64, StoreError>;

    /// Delete every comment of a post (post deletion cascade).
    async fn delete_post(&self, post_id: PostId) -> Result<u64, StoreError>;

    /// Delete every comment of an author and all replies beneath them
    /// (user deletion cascade).
    async fn delete_author(&self, author_id: AuthorId) -> Result<u64, StoreError>;

    /// Remove every comment.
    async fn clear_all(&self) -> Result<(), StoreError>;
}

pub use backend::CommentBackend;
pub use memory::InMemoryCommentStore;

#[cfg(feature = "postgres")]
pub use postgres::{PoolStats, PostgresCommentStore, PostgresConfig};

#[cfg(feature = "graph")]
pub use graph::{GraphConfig, Neo4jCommentStore};
