//! Core types for the comment store.

pub mod comment;
pub mod conversation;

pub use comment::{
    sort_canonical, AuthorId, Comment, CommentId, NewComment, PostId, ValidationError,
};
pub use conversation::{Conversation, ConversationNode, Walk};
