//! Nested conversation view.
//!
//! A [`Conversation`] is derived from the flat comment list of one post on
//! every read and never persisted. All traversals here use explicit stacks,
//! so arbitrarily deep reply chains are safe to walk, compare, clone and
//! drop. Serialization nests once per level; use [`Conversation::to_json_vec`]
//! to encode trees of any depth.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::comment::{AuthorId, Comment, CommentId, PostId};
use crate::canonical::canonical_hash_hex;

/// One comment in the reconstructed tree, carrying its replies.
#[derive(Serialize)]
pub struct ConversationNode {
    /// Comment identity.
    pub id: CommentId,
    /// Body text.
    pub text: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Who wrote it.
    pub author_id: AuthorId,
    /// Direct replies in `(created_at, id)` order.
    pub responses: Vec<ConversationNode>,
}

impl ConversationNode {
    /// Create a leaf node from a stored comment.
    pub fn leaf(comment: Comment) -> Self {
        Self {
            id: comment.id,
            text: comment.text,
            created_at: comment.created_at,
            author_id: comment.author_id,
            responses: Vec::new(),
        }
    }

    /// Number of comments in this subtree, including this one.
    pub fn subtree_size(&self) -> usize {
        Walk::from_node(self).count()
    }

    /// Pre-order walk over this subtree.
    pub fn walk(&self) -> Walk<'_> {
        Walk::from_node(self)
    }

    fn same_comment(&self, other: &Self) -> bool {
        self.id == other.id
            && self.text == other.text
            && self.created_at == other.created_at
            && self.author_id == other.author_id
            && self.responses.len() == other.responses.len()
    }

    fn shallow_clone(&self, responses: Vec<ConversationNode>) -> Self {
        Self {
            id: self.id,
            text: self.text.clone(),
            created_at: self.created_at,
            author_id: self.author_id,
            responses,
        }
    }
}

/// Deep copy of a forest, built bottom-up from its pre-order listing.
fn clone_forest(roots: &[ConversationNode]) -> Vec<ConversationNode> {
    let order: Vec<&ConversationNode> = Walk::from_roots(roots).map(|(_, node)| node).collect();
    let mut built: Vec<ConversationNode> = Vec::with_capacity(order.len());
    for node in order.into_iter().rev() {
        // The top of `built` holds this node's replies, first reply on top.
        let keep = built.len().saturating_sub(node.responses.len());
        let mut responses = built.split_off(keep);
        responses.reverse();
        built.push(node.shallow_clone(responses));
    }
    built.reverse();
    built
}

/// Pre-order comparison; equal reply counts at every node make equal shapes.
fn forest_eq(a: &[ConversationNode], b: &[ConversationNode]) -> bool {
    a.len() == b.len()
        && Walk::from_roots(a)
            .zip(Walk::from_roots(b))
            .all(|((_, x), (_, y))| x.same_comment(y))
}

impl Clone for ConversationNode {
    fn clone(&self) -> Self {
        self.shallow_clone(clone_forest(&self.responses))
    }
}

impl PartialEq for ConversationNode {
    fn eq(&self, other: &Self) -> bool {
        forest_eq(std::slice::from_ref(self), std::slice::from_ref(other))
    }
}

impl Eq for ConversationNode {}

impl fmt::Debug for ConversationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationNode")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("created_at", &self.created_at)
            .field("author_id", &self.author_id)
            .field("responses", &Outline(&self.responses))
            .finish()
    }
}

/// Flat `(depth, id)` listing of a forest for debug output.
struct Outline<'a>(&'a [ConversationNode]);

impl fmt::Debug for Outline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Walk::from_roots(self.0).map(|(depth, node)| (depth, node.id)))
            .finish()
    }
}

impl Drop for ConversationNode {
    fn drop(&mut self) {
        // Flatten before the fields drop so nested Vec drops never recurse deeply.
        let mut pending = std::mem::take(&mut self.responses);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.responses);
        }
    }
}

/// Full reply tree of one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    /// Post the conversation belongs to.
    pub post_id: PostId,
    /// Root comments in `(created_at, id)` order.
    pub roots: Vec<ConversationNode>,
    /// Number of distinct comments in the tree.
    pub total_comments: usize,
}

impl Conversation {
    /// Conversation of a post with no comments.
    pub fn empty(post_id: PostId) -> Self {
        Self {
            post_id,
            roots: Vec::new(),
            total_comments: 0,
        }
    }

    /// Whether the post has no comments.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Pre-order walk over every node of every root.
    pub fn iter(&self) -> Walk<'_> {
        Walk::from_roots(&self.roots)
    }

    /// Length of the longest reply chain (roots count as depth 1).
    pub fn depth(&self) -> usize {
        self.iter().map(|(depth, _)| depth + 1).max().unwrap_or(0)
    }

    /// Find a node anywhere in the tree.
    pub fn find(&self, id: CommentId) -> Option<&ConversationNode> {
        self.iter().map(|(_, node)| node).find(|node| node.id == id)
    }

    /// Parent of every node as placed in this tree, in pre-order.
    pub fn placement(&self) -> Vec<(CommentId, Option<CommentId>)> {
        let mut out = Vec::with_capacity(self.total_comments);
        let mut stack: Vec<(Option<CommentId>, &ConversationNode)> =
            self.roots.iter().rev().map(|n| (None, n)).collect();

        while let Some((parent, node)) = stack.pop() {
            out.push((node.id, parent));
            stack.extend(node.responses.iter().rev().map(|child| (Some(node.id), child)));
        }
        out
    }

    /// Stable hash of the tree shape.
    ///
    /// Two backends holding the same comments produce the same fingerprint,
    /// independent of timestamps and text.
    pub fn fingerprint(&self) -> String {
        let shape: Vec<(i64, Option<i64>)> = self
            .placement()
            .into_iter()
            .map(|(id, parent)| (id.get(), parent.map(|p| p.get())))
            .collect();
        canonical_hash_hex(&(self.post_id.get(), shape))
    }

    /// JSON encoding that grows the stack on demand, safe at any depth.
    pub fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128 * self.total_comments.max(1));
        let mut json = serde_json::Serializer::new(&mut out);
        self.serialize(serde_stacker::Serializer::new(&mut json))?;
        Ok(out)
    }
}

/// Pre-order iterator yielding `(depth, node)`, roots at depth 0.
pub struct Walk<'a> {
    stack: Vec<(usize, &'a ConversationNode)>,
}

impl<'a> Walk<'a> {
    fn from_roots(roots: &'a [ConversationNode]) -> Self {
        Self {
            stack: roots.iter().rev().map(|n| (0, n)).collect(),
        }
    }

    fn from_node(node: &'a ConversationNode) -> Self {
        Self { stack: vec![(0, node)] }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a ConversationNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.responses.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn node(id: i64, responses: Vec<ConversationNode>) -> ConversationNode {
        ConversationNode {
            id: CommentId::new(id),
            text: format!("comment {id}"),
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            author_id: AuthorId::new(1),
            responses,
        }
    }

    fn sample() -> Conversation {
        //   1          4
        //  / \
        // 2   3
        //     |
        //     5
        Conversation {
            post_id: PostId::new(7),
            roots: vec![
                node(1, vec![node(2, vec![]), node(3, vec![node(5, vec![])])]),
                node(4, vec![]),
            ],
            total_comments: 5,
        }
    }

    #[test]
    fn test_preorder_walk() {
        let conversation = sample();
        let visited: Vec<(usize, i64)> = conversation
            .iter()
            .map(|(depth, n)| (depth, n.id.get()))
            .collect();
        assert_eq!(visited, vec![(0, 1), (1, 2), (1, 3), (2, 5), (0, 4)]);
    }

    #[test]
    fn test_depth_and_find() {
        let conversation = sample();
        assert_eq!(conversation.depth(), 3);
        assert_eq!(conversation.find(CommentId::new(5)).map(|n| n.id.get()), Some(5));
        assert!(conversation.find(CommentId::new(99)).is_none());
        assert_eq!(conversation.roots[0].subtree_size(), 4);
        assert_eq!(Conversation::empty(PostId::new(1)).depth(), 0);
    }

    #[test]
    fn test_placement_reports_tree_parents() {
        let placement = sample().placement();
        assert_eq!(placement[3], (CommentId::new(5), Some(CommentId::new(3))));
        assert_eq!(placement[4], (CommentId::new(4), None));
    }

    #[test]
    fn test_fingerprint_ignores_text() {
        let a = sample();
        let mut b = sample();
        b.roots[1].text = "edited".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = sample();
        c.roots.swap(0, 1);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_deep_chain_drops_without_overflow() {
        let mut current = node(200_000, vec![]);
        for id in (1..200_000).rev() {
            current = node(id, vec![current]);
        }
        let conversation = Conversation {
            post_id: PostId::new(1),
            roots: vec![current],
            total_comments: 200_000,
        };
        assert_eq!(conversation.depth(), 200_000);
        drop(conversation);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["post_id"], 7);
        assert_eq!(json["total_comments"], 5);
        assert_eq!(json["roots"][0]["responses"][1]["responses"][0]["id"], 5);

        let bytes = sample().to_json_vec().unwrap();
        assert_eq!(bytes, serde_json::to_vec(&sample()).unwrap());
    }

    #[test]
    fn test_clone_and_eq_follow_shape() {
        let a = sample();
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.placement(), b.placement());

        let mut moved = sample();
        let five = moved.roots[0].responses[1].responses.pop().unwrap();
        moved.roots[0].responses[0].responses.push(five);
        assert_ne!(a, moved);
        assert_eq!(a.iter().count(), moved.iter().count());

        let mut edited = sample();
        edited.roots[0].responses[1].responses[0].text = "edited".to_string();
        assert_ne!(a, edited);
    }

    #[test]
    fn test_debug_lists_replies_flat() {
        let text = format!("{:?}", sample().roots[0]);
        assert!(text.contains("responses: [(0, CommentId(2)), (0, CommentId(3)), (1, CommentId(5))]"), "{text}");
    }

    #[test]
    fn test_deep_chain_clone_compare_and_encode() {
        let depth = 20_000;
        let mut current = node(depth, vec![]);
        for id in (1..depth).rev() {
            current = node(id, vec![current]);
        }
        let conversation = Conversation {
            post_id: PostId::new(1),
            roots: vec![current],
            total_comments: depth as usize,
        };

        let copy = conversation.clone();
        assert_eq!(copy, conversation);
        assert!(!format!("{copy:?}").is_empty());

        let bytes = conversation.to_json_vec().unwrap();
        let opens = bytes.iter().filter(|&&b| b == b'[').count();
        assert_eq!(opens, depth as usize + 1);
    }
}
