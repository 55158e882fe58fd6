//! The comment system as callers see it.
//!
//! `CommentSystem` bundles a store with the assembler and exposes the
//! operations the application and the REST layer use.

use std::sync::Arc;

use crate::assembler::ConversationAssembler;
use crate::migration::{migrate_if_empty, LegacyCommentSource, MigrationError, MigrationOutcome};
use crate::seed;
use crate::store::{CommentStore, StoreError};
use crate::types::{AuthorId, Comment, CommentId, Conversation, NewComment, PostId};

/// Threaded comments over one store.
pub struct CommentSystem<S: CommentStore> {
    store: Arc<S>,
    assembler: ConversationAssembler<S>,
}

impl<S: CommentStore> CommentSystem<S> {
    /// Create a system over `store`.
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Create a system over a shared store.
    pub fn from_arc(store: Arc<S>) -> Self {
        let assembler = ConversationAssembler::new(Arc::clone(&store));
        Self { store, assembler }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Import legacy flat comments if the store is empty.
    pub async fn initialize<L>(&self, source: &L) -> Result<MigrationOutcome, MigrationError>
    where
        L: LegacyCommentSource + ?Sized,
    {
        migrate_if_empty(self.store.as_ref(), source).await
    }

    /// Post a comment or a reply; returns the new identity.
    pub async fn add_comment(&self, comment: NewComment) -> Result<CommentId, StoreError> {
        self.store.add_comment(comment).await
    }

    /// Full reply tree of a post.
    pub async fn get_full_conversation(&self, post_id: PostId) -> Result<Conversation, StoreError> {
        self.assembler.get_full_conversation(post_id).await
    }

    /// Reply tree below one comment, or `None` if it does not exist.
    pub async fn get_thread(&self, comment_id: CommentId) -> Result<Option<Conversation>, StoreError> {
        self.assembler.get_subtree(comment_id).await
    }

    /// Fetch one comment.
    pub async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        self.store.get_comment(id).await
    }

    /// Parent of a comment.
    pub async fn get_parent(&self, id: CommentId) -> Result<Option<CommentId>, StoreError> {
        self.store.get_parent(id).await
    }

    /// Direct replies of a comment.
    pub async fn get_children(&self, id: CommentId) -> Result<Vec<Comment>, StoreError> {
        self.store.get_children(id).await
    }

    /// Posts with at least one comment.
    pub async fn get_all_posts_with_comments(&self) -> Result<Vec<PostId>, StoreError> {
        self.store.list_posts_with_comments().await
    }

    /// Known users.
    pub async fn get_all_users(&self) -> Result<Vec<AuthorId>, StoreError> {
        self.store.list_authors().await
    }

    /// Every comment identity.
    pub async fn get_all_comments(&self) -> Result<Vec<CommentId>, StoreError> {
        self.store.list_comment_ids().await
    }

    /// Seed 50 sample comments under `post_id`.
    pub async fn create_test_conversations(
        &self,
        post_id: PostId,
        base_user: AuthorId,
    ) -> Result<Vec<CommentId>, StoreError> {
        seed::create_test_conversations(self.store.as_ref(), post_id, base_user).await
    }

    /// Delete a comment with its replies.
    pub async fn delete_comment(&self, id: CommentId) -> Result<u64, StoreError> {
        self.store.delete_comment(id).await
    }

    /// Remove every comment.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        tracing::warn!("clearing all comments");
        self.store.clear_all().await
    }
}

impl<S: CommentStore> Clone for CommentSystem<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            assembler: self.assembler.clone(),
        }
    }
}
