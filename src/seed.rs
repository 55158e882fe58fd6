//! Deterministic sample conversations.
//!
//! Shape per post: 5 roots, each with 3 replies, each reply with 2 nested
//! replies, 50 comments in all. Root authors are `base_user`, reply `j`
//! is written by `base_user + j` and nested reply `k` by `base_user + k`.

use crate::store::{CommentStore, StoreError};
use crate::types::{AuthorId, CommentId, NewComment, PostId};

/// Root comments per seeded post.
pub const SEED_ROOTS: usize = 5;
/// Replies under each seeded root.
pub const SEED_REPLIES: usize = 3;
/// Nested replies under each seeded reply.
pub const SEED_NESTED: usize = 2;

/// Total comments one seeding run creates.
pub const fn seeded_comment_count() -> usize {
    SEED_ROOTS * (1 + SEED_REPLIES * (1 + SEED_NESTED))
}

/// Seed the sample conversations under `post_id`.
///
/// Returns the created identities in insertion order. The first failing
/// insert aborts seeding and is returned.
pub async fn create_test_conversations<S>(
    store: &S,
    post_id: PostId,
    base_user: AuthorId,
) -> Result<Vec<CommentId>, StoreError>
where
    S: CommentStore + ?Sized,
{
    let author = |offset: usize| AuthorId::new(base_user.get() + offset as i64);
    let mut created = Vec::with_capacity(seeded_comment_count());

    for i in 1..=SEED_ROOTS {
        let root_id = store
            .add_comment(NewComment::root(base_user, post_id, format!("Root comment {i}")))
            .await?;
        created.push(root_id);

        for j in 1..=SEED_REPLIES {
            let reply_id = store
                .add_comment(NewComment::reply(
                    author(j),
                    post_id,
                    format!("Reply {j} to comment {i}"),
                    root_id,
                ))
                .await?;
            created.push(reply_id);

            for k in 1..=SEED_NESTED {
                let nested_id = store
                    .add_comment(NewComment::reply(
                        author(k),
                        post_id,
                        format!("Nested reply {k} to reply {j} of comment {i}"),
                        reply_id,
                    ))
                    .await?;
                created.push(nested_id);
            }
        }
    }

    tracing::info!(post_id = %post_id, created = created.len(), "seeded test conversations");
    Ok(created)
}
