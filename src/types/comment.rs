//! Comment types for the threaded comment store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw integer identifier.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Get the raw integer identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Identifiers issued by the surrounding schema are strictly positive.
            pub const fn is_valid(&self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

integer_id!(
    /// Identity of a comment, unique within one store.
    ///
    /// Allocated by the store; monotonically non-decreasing in creation order.
    CommentId
);

integer_id!(
    /// Identity of a comment author (a user of the surrounding schema).
    AuthorId
);

integer_id!(
    /// Identity of the post a comment belongs to.
    PostId
);

impl CommentId {
    /// Identity handed out by an empty store.
    pub const FIRST: CommentId = CommentId(1);

    /// The identity following this one.
    pub const fn next(&self) -> CommentId {
        CommentId(self.0 + 1)
    }
}

/// A persisted comment.
///
/// Comments are never updated in place; they disappear only through
/// cascade deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Store-assigned identity.
    pub id: CommentId,
    /// Who wrote it.
    pub author_id: AuthorId,
    /// Owning post.
    pub post_id: PostId,
    /// Body text, never empty.
    pub text: String,
    /// Comment this one replies to. `None` for root comments.
    pub parent_id: Option<CommentId>,
    /// Store-assigned creation time.
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Whether this is a top-level reply to the post.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Canonical ordering: creation time, ties broken by identity.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort comments into canonical `(created_at, id)` order.
pub fn sort_canonical(comments: &mut [Comment]) {
    comments.sort_by(Comment::canonical_cmp);
}

/// Reasons a write request is rejected before it reaches a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Author id missing or not positive.
    #[error("invalid author id: {0}")]
    InvalidAuthor(AuthorId),
    /// Post id missing or not positive.
    #[error("invalid post id: {0}")]
    InvalidPost(PostId),
    /// Body text empty or whitespace only.
    #[error("comment text must not be empty")]
    EmptyText,
    /// Parent id given but not positive.
    #[error("invalid parent id: {0}")]
    InvalidParent(CommentId),
}

/// Request to add a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    /// Who writes it.
    pub author_id: AuthorId,
    /// Owning post.
    pub post_id: PostId,
    /// Body text.
    pub text: String,
    /// Comment being replied to, if any.
    #[serde(default)]
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    /// Create a root comment request.
    pub fn root(author_id: AuthorId, post_id: PostId, text: impl Into<String>) -> Self {
        Self {
            author_id,
            post_id,
            text: text.into(),
            parent_id: None,
        }
    }

    /// Create a reply request.
    pub fn reply(
        author_id: AuthorId,
        post_id: PostId,
        text: impl Into<String>,
        parent_id: CommentId,
    ) -> Self {
        Self {
            author_id,
            post_id,
            text: text.into(),
            parent_id: Some(parent_id),
        }
    }

    /// Check the request without touching any store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.author_id.is_valid() {
            return Err(ValidationError::InvalidAuthor(self.author_id));
        }
        if !self.post_id.is_valid() {
            return Err(ValidationError::InvalidPost(self.post_id));
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        match self.parent_id {
            Some(parent) if !parent.is_valid() => Err(ValidationError::InvalidParent(parent)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_comment(id: i64, secs: i64) -> Comment {
        Comment {
            id: CommentId::new(id),
            author_id: AuthorId::new(1),
            post_id: PostId::new(1),
            text: format!("comment {id}"),
            parent_id: None,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_canonical_order_breaks_ties_by_id() {
        let mut comments = vec![make_comment(3, 10), make_comment(2, 10), make_comment(1, 20)];
        sort_canonical(&mut comments);

        let ids: Vec<i64> = comments.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_validate_rejects_blank_text() {
        let request = NewComment::root(AuthorId::new(1), PostId::new(1), "   \n");
        assert_eq!(request.validate(), Err(ValidationError::EmptyText));
    }

    #[test]
    fn test_validate_rejects_missing_ids() {
        let request = NewComment::root(AuthorId::new(0), PostId::new(1), "hi");
        assert_eq!(request.validate(), Err(ValidationError::InvalidAuthor(AuthorId::new(0))));

        let request = NewComment::root(AuthorId::new(1), PostId::new(-4), "hi");
        assert_eq!(request.validate(), Err(ValidationError::InvalidPost(PostId::new(-4))));

        let request = NewComment::reply(AuthorId::new(1), PostId::new(1), "hi", CommentId::new(0));
        assert_eq!(request.validate(), Err(ValidationError::InvalidParent(CommentId::new(0))));
    }

    #[test]
    fn test_validate_accepts_reply() {
        let request = NewComment::reply(AuthorId::new(2), PostId::new(5), "reply A", CommentId::new(100));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&CommentId::new(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(CommentId::new(41).next(), CommentId::new(42));
    }
}
