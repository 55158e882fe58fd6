//! Conversation assembly.
//!
//! Turns the flat, parent-pointer comment list of a post into the nested
//! reply tree.
//!
//! ## Algorithm
//!
//! 1. Sort comments by `(created_at, id)`
//! 2. Index them by identity in one pass (first occurrence wins)
//! 3. Link each comment under its parent in a second pass; comments whose
//!    parent is absent from the post become roots
//! 4. Promote one member of every parent cycle to root so each comment is
//!    reachable exactly once
//! 5. Materialize the owned tree bottom-up from a pre-order listing
//!
//! No step recurses, so thread depth is bounded only by memory.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::store::{CommentStore, StoreError};
use crate::types::{sort_canonical, Comment, CommentId, Conversation, ConversationNode, PostId};

/// Repairs applied while assembling damaged data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Comments dropped because their identity was already seen.
    pub duplicates: usize,
    /// Comments belonging to another post that were ignored.
    pub foreign: usize,
    /// Comments whose parent is missing from the post, placed as roots.
    pub dangling: usize,
    /// Cycles broken by promoting a member to root.
    pub cycles_broken: usize,
}

impl AssemblyReport {
    /// Whether the input was a clean forest.
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Assemble the conversation of `post_id` from its comments.
pub fn assemble_conversation(post_id: PostId, comments: Vec<Comment>) -> Conversation {
    assemble_with_report(post_id, comments).0
}

/// Assemble a conversation and report the repairs that were needed.
pub fn assemble_with_report(
    post_id: PostId,
    mut comments: Vec<Comment>,
) -> (Conversation, AssemblyReport) {
    let mut report = AssemblyReport::default();
    if comments.is_empty() {
        return (Conversation::empty(post_id), report);
    }
    sort_canonical(&mut comments);

    // Pass 1: identity -> position.
    let mut index: HashMap<CommentId, usize> = HashMap::with_capacity(comments.len());
    let mut nodes: Vec<Comment> = Vec::with_capacity(comments.len());
    for comment in comments {
        if comment.post_id != post_id {
            report.foreign += 1;
            continue;
        }
        if index.contains_key(&comment.id) {
            tracing::warn!(comment_id = %comment.id, post_id = %post_id, "duplicate comment id ignored");
            report.duplicates += 1;
            continue;
        }
        index.insert(comment.id, nodes.len());
        nodes.push(comment);
    }

    // Pass 2: link under parents. Children lists inherit canonical order.
    let n = nodes.len();
    let mut parent_of: Vec<Option<usize>> = vec![None; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots: Vec<usize> = Vec::new();

    for (i, comment) in nodes.iter().enumerate() {
        let Some(parent_id) = comment.parent_id else {
            roots.push(i);
            continue;
        };
        match index.get(&parent_id) {
            Some(&p) if p != i => {
                children[p].push(i);
                parent_of[i] = Some(p);
            }
            Some(_) => {
                tracing::warn!(comment_id = %comment.id, "comment replies to itself, placed as root");
                report.cycles_broken += 1;
                roots.push(i);
            }
            None => {
                tracing::debug!(
                    comment_id = %comment.id,
                    parent_id = %parent_id,
                    "parent not in post, placed as root"
                );
                report.dangling += 1;
                roots.push(i);
            }
        }
    }

    // Anything unreachable from a root sits on or below a parent cycle.
    let mut reached = vec![false; n];
    for &root in &roots {
        mark_reachable(root, &children, &mut reached);
    }
    for i in 0..n {
        if reached[i] {
            continue;
        }
        let head = cycle_head(i, &parent_of);
        if let Some(p) = parent_of[head].take() {
            children[p].retain(|&c| c != head);
        }
        tracing::warn!(comment_id = %nodes[head].id, "reply cycle broken, placed as root");
        report.cycles_broken += 1;
        let at = roots.binary_search(&head).unwrap_or_else(|at| at);
        roots.insert(at, head);
        mark_reachable(head, &children, &mut reached);
    }

    // Pre-order listing; reversed, every child is built before its parent.
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(i) = stack.pop() {
        order.push(i);
        stack.extend(children[i].iter().rev());
    }

    let mut slots: Vec<Option<ConversationNode>> =
        nodes.into_iter().map(|c| Some(ConversationNode::leaf(c))).collect();
    for &i in order.iter().rev() {
        let responses: Vec<ConversationNode> =
            children[i].iter().filter_map(|&c| slots[c].take()).collect();
        if let Some(node) = slots[i].as_mut() {
            node.responses = responses;
        }
    }

    let conversation = Conversation {
        post_id,
        roots: roots.iter().filter_map(|&i| slots[i].take()).collect(),
        total_comments: n,
    };
    (conversation, report)
}

/// Earliest member of the parent cycle above an unreachable node.
///
/// Parents of unreachable nodes are themselves unreachable, so following
/// them from `start` must revisit a node; the revisited suffix is the cycle.
fn cycle_head(start: usize, parent_of: &[Option<usize>]) -> usize {
    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut at = start;
    loop {
        if let Some(&from) = position.get(&at) {
            return path[from..].iter().copied().min().unwrap_or(at);
        }
        position.insert(at, path.len());
        path.push(at);
        match parent_of[at] {
            Some(p) => at = p,
            None => return at,
        }
    }
}

fn mark_reachable(start: usize, children: &[Vec<usize>], reached: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if reached[i] {
            continue;
        }
        reached[i] = true;
        stack.extend(children[i].iter().copied().filter(|&c| !reached[c]));
    }
}

/// Keep `root` and every comment beneath it, with `root` detached from its parent.
fn restrict_to_subtree(root: CommentId, comments: Vec<Comment>) -> Vec<Comment> {
    let mut replies: HashMap<CommentId, Vec<CommentId>> = HashMap::new();
    for comment in &comments {
        if let Some(parent) = comment.parent_id {
            replies.entry(parent).or_default().push(comment.id);
        }
    }

    let mut keep: HashSet<CommentId> = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if keep.insert(id) {
            if let Some(ids) = replies.get(&id) {
                stack.extend(ids.iter().copied());
            }
        }
    }

    comments
        .into_iter()
        .filter(|c| keep.contains(&c.id))
        .map(|mut c| {
            if c.id == root {
                c.parent_id = None;
            }
            c
        })
        .collect()
}

/// Reads comments from a store and assembles conversations.
pub struct ConversationAssembler<S: CommentStore> {
    store: Arc<S>,
}

impl<S: CommentStore> ConversationAssembler<S> {
    /// Create an assembler over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Full reply tree of a post. A post without comments yields an empty tree.
    pub async fn get_full_conversation(&self, post_id: PostId) -> Result<Conversation, StoreError> {
        let comments = self.store.get_all_comments_for_post(post_id).await?;
        let fetched = comments.len();
        let (conversation, report) = assemble_with_report(post_id, comments);

        tracing::debug!(
            post_id = %post_id,
            fetched,
            total = conversation.total_comments,
            roots = conversation.roots.len(),
            clean = report.is_clean(),
            "conversation assembled"
        );
        Ok(conversation)
    }

    /// Reply tree hanging from one comment, that comment as its single root.
    ///
    /// Returns `None` if the comment does not exist.
    pub async fn get_subtree(&self, comment_id: CommentId) -> Result<Option<Conversation>, StoreError> {
        let Some(comment) = self.store.get_comment(comment_id).await? else {
            return Ok(None);
        };
        let comments = self.store.get_all_comments_for_post(comment.post_id).await?;
        let subtree = restrict_to_subtree(comment_id, comments);
        Ok(Some(assemble_conversation(comment.post_id, subtree)))
    }
}

impl<S: CommentStore> Clone for ConversationAssembler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthorId;
    use chrono::{TimeZone, Utc};

    fn make_comment(id: i64, parent: Option<i64>, secs: i64) -> Comment {
        Comment {
            id: CommentId::new(id),
            author_id: AuthorId::new(1),
            post_id: PostId::new(1),
            text: format!("comment {id}"),
            parent_id: parent.map(CommentId::new),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn ids(nodes: &[ConversationNode]) -> Vec<i64> {
        nodes.iter().map(|n| n.id.get()).collect()
    }

    #[test]
    fn test_empty_post() {
        let conversation = assemble_conversation(PostId::new(42), vec![]);
        assert_eq!(conversation, Conversation::empty(PostId::new(42)));
    }

    #[test]
    fn test_single_root_two_replies() {
        let comments = vec![
            make_comment(102, Some(100), 3),
            make_comment(100, None, 1),
            make_comment(101, Some(100), 2),
        ];
        let conversation = assemble_conversation(PostId::new(1), comments);

        assert_eq!(conversation.total_comments, 3);
        assert_eq!(ids(&conversation.roots), vec![100]);
        assert_eq!(ids(&conversation.roots[0].responses), vec![101, 102]);
    }

    #[test]
    fn test_three_level_nesting() {
        let comments = vec![
            make_comment(200, None, 1),
            make_comment(201, Some(200), 2),
            make_comment(202, Some(201), 3),
        ];
        let conversation = assemble_conversation(PostId::new(1), comments);

        let root = &conversation.roots[0];
        assert_eq!(root.id.get(), 200);
        assert_eq!(ids(&root.responses), vec![201]);
        assert_eq!(ids(&root.responses[0].responses), vec![202]);
        assert_eq!(conversation.depth(), 3);
    }

    #[test]
    fn test_dangling_parent_becomes_root() {
        let comments = vec![make_comment(1, None, 1), make_comment(300, Some(999), 2)];
        let (conversation, report) = assemble_with_report(PostId::new(1), comments);

        assert_eq!(ids(&conversation.roots), vec![1, 300]);
        assert_eq!(conversation.total_comments, 2);
        assert_eq!(report.dangling, 1);
    }

    #[test]
    fn test_reply_created_before_parent_still_nests() {
        // Clock skew between writers: reply stamped earlier than its parent.
        let comments = vec![make_comment(2, Some(1), 1), make_comment(1, None, 5)];
        let conversation = assemble_conversation(PostId::new(1), comments);

        assert_eq!(ids(&conversation.roots), vec![1]);
        assert_eq!(ids(&conversation.roots[0].responses), vec![2]);
    }

    #[test]
    fn test_timestamp_ties_broken_by_id() {
        let comments = vec![
            make_comment(1, None, 0),
            make_comment(5, Some(1), 7),
            make_comment(3, Some(1), 7),
            make_comment(4, Some(1), 7),
        ];
        let conversation = assemble_conversation(PostId::new(1), comments);
        assert_eq!(ids(&conversation.roots[0].responses), vec![3, 4, 5]);
    }

    #[test]
    fn test_duplicate_ids_counted_once() {
        let comments = vec![
            make_comment(1, None, 1),
            make_comment(2, Some(1), 2),
            make_comment(2, None, 3),
        ];
        let (conversation, report) = assemble_with_report(PostId::new(1), comments);

        assert_eq!(conversation.total_comments, 2);
        assert_eq!(conversation.iter().count(), 2);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_cycle_is_broken() {
        // 2 -> 3 -> 4 -> 2, with 5 hanging below 4.
        let comments = vec![
            make_comment(1, None, 1),
            make_comment(2, Some(4), 2),
            make_comment(3, Some(2), 3),
            make_comment(4, Some(3), 4),
            make_comment(5, Some(4), 5),
        ];
        let (conversation, report) = assemble_with_report(PostId::new(1), comments);

        assert_eq!(report.cycles_broken, 1);
        assert_eq!(ids(&conversation.roots), vec![1, 2]);
        assert_eq!(conversation.iter().count(), 5);
        assert_eq!(conversation.depth(), 4);
    }

    #[test]
    fn test_reply_below_cycle_keeps_its_parent() {
        // 5 hangs below the 2 -> 3 -> 4 -> 2 cycle but is stamped before it.
        let comments = vec![
            make_comment(1, None, 0),
            make_comment(5, Some(4), 1),
            make_comment(2, Some(4), 3),
            make_comment(3, Some(2), 4),
            make_comment(4, Some(3), 5),
        ];
        let (conversation, report) = assemble_with_report(PostId::new(1), comments);

        assert_eq!(report.cycles_broken, 1);
        assert_eq!(ids(&conversation.roots), vec![1, 2]);
        let two = &conversation.roots[1];
        assert_eq!(ids(&two.responses), vec![3]);
        assert_eq!(ids(&two.responses[0].responses), vec![4]);
        assert_eq!(ids(&two.responses[0].responses[0].responses), vec![5]);
        assert_eq!(conversation.iter().count(), 5);
    }

    #[test]
    fn test_two_separate_cycles() {
        let comments = vec![
            make_comment(10, Some(11), 1),
            make_comment(11, Some(10), 2),
            make_comment(20, Some(21), 3),
            make_comment(21, Some(20), 4),
        ];
        let (conversation, report) = assemble_with_report(PostId::new(1), comments);

        assert_eq!(report.cycles_broken, 2);
        assert_eq!(ids(&conversation.roots), vec![10, 20]);
        assert_eq!(conversation.total_comments, 4);
    }

    #[test]
    fn test_self_parent_is_root() {
        let comments = vec![make_comment(1, Some(1), 1), make_comment(2, Some(1), 2)];
        let (conversation, report) = assemble_with_report(PostId::new(1), comments);

        assert_eq!(ids(&conversation.roots), vec![1]);
        assert_eq!(ids(&conversation.roots[0].responses), vec![2]);
        assert_eq!(report.cycles_broken, 1);
    }

    #[test]
    fn test_foreign_comments_ignored() {
        let mut foreign = make_comment(9, None, 1);
        foreign.post_id = PostId::new(2);
        let (conversation, report) =
            assemble_with_report(PostId::new(1), vec![make_comment(1, None, 0), foreign]);

        assert_eq!(conversation.total_comments, 1);
        assert_eq!(report.foreign, 1);
    }

    #[test]
    fn test_deep_chain() {
        let depth = 100_000;
        let comments: Vec<Comment> = (1..=depth)
            .map(|i| make_comment(i, if i == 1 { None } else { Some(i - 1) }, i))
            .collect();
        let conversation = assemble_conversation(PostId::new(1), comments);

        assert_eq!(conversation.total_comments, depth as usize);
        assert_eq!(conversation.depth(), depth as usize);
    }

    #[test]
    fn test_restrict_to_subtree() {
        let comments = vec![
            make_comment(1, None, 1),
            make_comment(2, Some(1), 2),
            make_comment(3, Some(2), 3),
            make_comment(4, Some(1), 4),
        ];
        let subtree = restrict_to_subtree(CommentId::new(2), comments);
        let kept: Vec<(i64, Option<i64>)> = subtree
            .iter()
            .map(|c| (c.id.get(), c.parent_id.map(|p| p.get())))
            .collect();
        assert_eq!(kept, vec![(2, None), (3, Some(2))]);
    }
}
