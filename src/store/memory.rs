//! In-memory comment store for tests and demos.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{CommentStore, StoreError};
use crate::types::{sort_canonical, AuthorId, Comment, CommentId, NewComment, PostId};

/// Source of creation timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct State {
    /// Comments by identity.
    comments: BTreeMap<CommentId, Comment>,
    /// Parent -> direct replies. Keys may name comments that no longer exist.
    children: BTreeMap<CommentId, BTreeSet<CommentId>>,
    /// Users registered without having commented yet.
    users: BTreeSet<AuthorId>,
    /// Last identity handed out. Never decreases, like an auto-increment column.
    sequence: i64,
}

impl State {
    fn insert(&mut self, comment: Comment) {
        if let Some(parent) = comment.parent_id {
            self.children.entry(parent).or_default().insert(comment.id);
        }
        self.sequence = self.sequence.max(comment.id.get());
        self.comments.insert(comment.id, comment);
    }

    fn remove_subtree(&mut self, root: CommentId) -> u64 {
        let mut removed = 0;
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            let Some(comment) = self.comments.remove(&id) else {
                continue;
            };
            removed += 1;

            if let Some(parent) = comment.parent_id {
                if let Some(siblings) = self.children.get_mut(&parent) {
                    siblings.remove(&id);
                    if siblings.is_empty() {
                        self.children.remove(&parent);
                    }
                }
            }
            if let Some(replies) = self.children.remove(&id) {
                stack.extend(replies);
            }
        }
        removed
    }

    fn collect(&self, ids: impl IntoIterator<Item = CommentId>) -> Vec<Comment> {
        let mut out: Vec<Comment> = ids
            .into_iter()
            .filter_map(|id| self.comments.get(&id).cloned())
            .collect();
        sort_canonical(&mut out);
        out
    }
}

/// In-memory comment store.
///
/// Adjacency list kept in `BTreeMap`s behind a single lock; each operation
/// holds the lock for its whole duration, so identity allocation and insert
/// are one atomic step.
#[derive(Clone)]
pub struct InMemoryCommentStore {
    state: Arc<RwLock<State>>,
    clock: Clock,
}

impl InMemoryCommentStore {
    /// Create a new empty store stamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    /// Create a store with a custom timestamp source.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock,
        }
    }

    /// Make a user known to the store without a comment.
    pub fn register_user(&self, user: AuthorId) {
        self.state.write().users.insert(user);
    }

    /// Insert a comment verbatim, bypassing validation and parent checks.
    ///
    /// Models rows written out of band (dangling or cyclic parents) so readers
    /// can be exercised against damaged data.
    pub fn insert_unchecked(&self, comment: Comment) {
        self.state.write().insert(comment);
    }

    /// Number of comments held.
    pub fn len(&self) -> usize {
        self.state.read().comments.len()
    }

    /// Whether the store holds no comments.
    pub fn is_empty(&self) -> bool {
        self.state.read().comments.is_empty()
    }
}

impl Default for InMemoryCommentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryCommentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("InMemoryCommentStore")
            .field("comments", &state.comments.len())
            .field("sequence", &state.sequence)
            .finish()
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn add_comment(&self, comment: NewComment) -> Result<CommentId, StoreError> {
        comment.validate()?;

        let mut state = self.state.write();

        if let Some(parent_id) = comment.parent_id {
            let parent = state
                .comments
                .get(&parent_id)
                .ok_or(StoreError::ParentNotFound(parent_id))?;
            if parent.post_id != comment.post_id {
                return Err(StoreError::ParentPostMismatch {
                    parent: parent_id,
                    expected: comment.post_id,
                    found: parent.post_id,
                });
            }
        }

        let id = CommentId::new(state.sequence + 1);
        state.insert(Comment {
            id,
            author_id: comment.author_id,
            post_id: comment.post_id,
            text: comment.text,
            parent_id: comment.parent_id,
            created_at: (self.clock)(),
        });

        tracing::debug!(comment_id = %id, post_id = %comment.post_id, "comment added");
        Ok(id)
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>, StoreError> {
        Ok(self.state.read().comments.get(&id).cloned())
    }

    async fn get_parent(&self, id: CommentId) -> Result<Option<CommentId>, StoreError> {
        Ok(self
            .state
            .read()
            .comments
            .get(&id)
            .and_then(|c| c.parent_id))
    }

    async fn get_children(&self, id: CommentId) -> Result<Vec<Comment>, StoreError> {
        let state = self.state.read();
        let replies = state.children.get(&id).cloned().unwrap_or_default();
        Ok(state.collect(replies))
    }

    async fn get_all_comments_for_post(&self, post_id: PostId) -> Result<Vec<Comment>, StoreError> {
        let state = self.state.read();
        let ids: Vec<CommentId> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .map(|c| c.id)
            .collect();
        Ok(state.collect(ids))
    }

    async fn next_available_id(&self) -> Result<CommentId, StoreError> {
        Ok(self
            .state
            .read()
            .comments
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(CommentId::FIRST))
    }

    async fn count_comments(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().comments.len() as u64)
    }

    async fn list_posts_with_comments(&self) -> Result<Vec<PostId>, StoreError> {
        let posts: BTreeSet<PostId> = self
            .state
            .read()
            .comments
            .values()
            .map(|c| c.post_id)
            .collect();
        Ok(posts.into_iter().collect())
    }

    async fn list_authors(&self) -> Result<Vec<AuthorId>, StoreError> {
        let state = self.state.read();
        let mut authors = state.users.clone();
        authors.extend(state.comments.values().map(|c| c.author_id));
        Ok(authors.into_iter().collect())
    }

    async fn list_comment_ids(&self) -> Result<Vec<CommentId>, StoreError> {
        Ok(self.state.read().comments.keys().copied().collect())
    }

    async fn delete_comment(&self, id: CommentId) -> Result<u64, StoreError> {
        let removed = self.state.write().remove_subtree(id);
        tracing::debug!(comment_id = %id, removed, "comment subtree deleted");
        Ok(removed)
    }

    async fn delete_post(&self, post_id: PostId) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        let ids: Vec<CommentId> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .map(|c| c.id)
            .collect();

        let removed: u64 = ids.into_iter().map(|id| state.remove_subtree(id)).sum();
        tracing::debug!(post_id = %post_id, removed, "post comments deleted");
        Ok(removed)
    }

    async fn delete_author(&self, author_id: AuthorId) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        state.users.remove(&author_id);
        let ids: Vec<CommentId> = state
            .comments
            .values()
            .filter(|c| c.author_id == author_id)
            .map(|c| c.id)
            .collect();

        let removed: u64 = ids.into_iter().map(|id| state.remove_subtree(id)).sum();
        tracing::debug!(author_id = %author_id, removed, "author comments deleted");
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.comments.clear();
        state.children.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock advancing one second per call.
    fn ticking_clock() -> Clock {
        let tick = Arc::new(AtomicI64::new(0));
        Arc::new(move || {
            let n = tick.fetch_add(1, Ordering::SeqCst);
            Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(n)
        })
    }

    fn frozen_clock() -> Clock {
        Arc::new(|| Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn root(author: i64, post: i64, text: &str) -> NewComment {
        NewComment::root(AuthorId::new(author), PostId::new(post), text)
    }

    fn reply(author: i64, post: i64, text: &str, parent: CommentId) -> NewComment {
        NewComment::reply(AuthorId::new(author), PostId::new(post), text, parent)
    }

    #[tokio::test]
    async fn test_add_and_get_comment() {
        let store = InMemoryCommentStore::with_clock(ticking_clock());

        let id = store.add_comment(root(1, 5, "root")).await.unwrap();
        assert_eq!(id, CommentId::FIRST);

        let comment = store.get_comment(id).await.unwrap().unwrap();
        assert_eq!(comment.text, "root");
        assert_eq!(comment.post_id, PostId::new(5));
        assert!(comment.is_root());
    }

    #[tokio::test]
    async fn test_parent_and_children() {
        let store = InMemoryCommentStore::with_clock(ticking_clock());

        let root_id = store.add_comment(root(1, 5, "root")).await.unwrap();
        let a = store.add_comment(reply(2, 5, "reply A", root_id)).await.unwrap();
        let b = store.add_comment(reply(3, 5, "reply B", root_id)).await.unwrap();

        let children = store.get_children(root_id).await.unwrap();
        let ids: Vec<CommentId> = children.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);

        assert_eq!(store.get_parent(b).await.unwrap(), Some(root_id));
        assert_eq!(store.get_parent(root_id).await.unwrap(), None);
        assert_eq!(store.get_parent(CommentId::new(999)).await.unwrap(), None);
        assert!(store.get_children(CommentId::new(999)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_dangling_parent() {
        let store = InMemoryCommentStore::new();

        let err = store
            .add_comment(reply(1, 5, "orphan", CommentId::new(999)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound(id) if id == CommentId::new(999)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_parent_from_other_post() {
        let store = InMemoryCommentStore::new();
        let other = store.add_comment(root(1, 6, "elsewhere")).await.unwrap();

        let err = store.add_comment(reply(1, 5, "cross", other)).await.unwrap_err();
        assert!(matches!(err, StoreError::ParentPostMismatch { found, .. } if found == PostId::new(6)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_request() {
        let store = InMemoryCommentStore::new();
        let err = store.add_comment(root(1, 5, "")).await.unwrap_err();
        assert!(err.is_rejection());
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn test_same_timestamp_ordered_by_id() {
        let store = InMemoryCommentStore::with_clock(frozen_clock());
        for i in 0..5 {
            store.add_comment(root(1, 1, &format!("c{i}"))).await.unwrap();
        }

        let comments = store.get_all_comments_for_post(PostId::new(1)).await.unwrap();
        let ids: Vec<i64> = comments.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_next_available_id() {
        let store = InMemoryCommentStore::new();
        assert_eq!(store.next_available_id().await.unwrap(), CommentId::FIRST);

        store.add_comment(root(1, 1, "a")).await.unwrap();
        let last = store.add_comment(root(1, 1, "b")).await.unwrap();
        assert_eq!(store.next_available_id().await.unwrap(), last.next());
    }

    #[tokio::test]
    async fn test_identities_never_reused_after_delete() {
        let store = InMemoryCommentStore::new();
        let a = store.add_comment(root(1, 1, "a")).await.unwrap();
        store.delete_comment(a).await.unwrap();

        let b = store.add_comment(root(1, 1, "b")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_cascade_delete_subtree() {
        let store = InMemoryCommentStore::with_clock(ticking_clock());

        let r1 = store.add_comment(root(1, 1, "r1")).await.unwrap();
        let r1a = store.add_comment(reply(2, 1, "r1a", r1)).await.unwrap();
        store.add_comment(reply(3, 1, "r1a-i", r1a)).await.unwrap();
        let r2 = store.add_comment(root(1, 1, "r2")).await.unwrap();
        let r2a = store.add_comment(reply(2, 1, "r2a", r2)).await.unwrap();

        assert_eq!(store.delete_comment(r1).await.unwrap(), 3);

        let ids = store.list_comment_ids().await.unwrap();
        assert_eq!(ids, vec![r2, r2a]);
        assert_eq!(store.delete_comment(r1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_author_removes_replies_beneath() {
        let store = InMemoryCommentStore::with_clock(ticking_clock());

        let r = store.add_comment(root(1, 1, "by 1")).await.unwrap();
        let mid = store.add_comment(reply(2, 1, "by 2", r)).await.unwrap();
        store.add_comment(reply(1, 1, "by 1 again", mid)).await.unwrap();
        let other = store.add_comment(root(3, 1, "by 3")).await.unwrap();

        assert_eq!(store.delete_author(AuthorId::new(1)).await.unwrap(), 3);
        assert_eq!(store.list_comment_ids().await.unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn test_delete_post() {
        let store = InMemoryCommentStore::new();
        let r = store.add_comment(root(1, 1, "p1")).await.unwrap();
        store.add_comment(reply(2, 1, "p1 reply", r)).await.unwrap();
        store.add_comment(root(1, 2, "p2")).await.unwrap();

        assert_eq!(store.delete_post(PostId::new(1)).await.unwrap(), 2);
        assert_eq!(store.list_posts_with_comments().await.unwrap(), vec![PostId::new(2)]);
    }

    #[tokio::test]
    async fn test_listing_helpers() {
        let store = InMemoryCommentStore::new();
        store.register_user(AuthorId::new(9));
        store.add_comment(root(3, 2, "a")).await.unwrap();
        store.add_comment(root(1, 7, "b")).await.unwrap();

        assert_eq!(
            store.list_authors().await.unwrap(),
            vec![AuthorId::new(1), AuthorId::new(3), AuthorId::new(9)]
        );
        assert_eq!(
            store.list_posts_with_comments().await.unwrap(),
            vec![PostId::new(2), PostId::new(7)]
        );
        assert_eq!(store.count_comments().await.unwrap(), 2);

        store.clear_all().await.unwrap();
        assert_eq!(store.count_comments().await.unwrap(), 0);
        assert!(store.list_posts_with_comments().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_get_unique_ids() {
        let store = Arc::new(InMemoryCommentStore::new());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.add_comment(root(1, 1, &format!("c{i}"))).await.unwrap()
                })
            })
            .collect();

        let mut ids = BTreeSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 64);
    }
}
