//! # threadscape
//!
//! Threaded comments for GreenScape posts.
//!
//! Comments are stored flat, each optionally pointing at the comment it
//! replies to. Reading a post reassembles the flat records into a forest of
//! reply trees.
//!
//! ## Architecture
//!
//! ```text
//! REST / CommentSystem → CommentStore (Memory, Postgres or Neo4j)
//!                              ↓
//!                  flat comments, (created_at, id) order
//!                              ↓
//!                  assembler → Conversation (roots → responses → ...)
//! ```
//!
//! ## Guarantees
//!
//! - Identities are allocated atomically by the store, never precomputed
//! - Every comment of a post appears exactly once in its conversation
//! - Siblings are ordered by `(created_at, id)` ascending
//! - A reply whose parent is missing is shown as a root, never dropped
//! - Deleting a comment removes its whole reply subtree

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod canonical;
pub mod config;
pub mod migration;
pub mod seed;
pub mod store;
pub mod system;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use assembler::{assemble_conversation, assemble_with_report, AssemblyReport, ConversationAssembler};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use config::{BackendKind, StoreConfig};
pub use migration::{
    migrate_if_empty, InMemoryLegacySource, LegacyComment, LegacyCommentSource, MigrationError,
    MigrationOutcome,
};
#[cfg(feature = "postgres")]
pub use migration::PostgresLegacySource;
pub use seed::{create_test_conversations, seeded_comment_count};
pub use store::{CommentBackend, CommentStore, InMemoryCommentStore, StoreError};
#[cfg(feature = "postgres")]
pub use store::PostgresCommentStore;
#[cfg(feature = "graph")]
pub use store::Neo4jCommentStore;
pub use system::CommentSystem;
pub use types::{
    AuthorId, Comment, CommentId, Conversation, ConversationNode, NewComment, PostId, ValidationError,
};

#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};
