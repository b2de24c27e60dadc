//! Conversion between the flat and the nested forms of a post's comments

use std::collections::HashMap;

use crate::{Comment, CommentId, CommentNode};

/// Nests `flat` by `parent_id` and returns the root comments
///
/// Input order is kept among siblings. If an id appears several times, the
/// last occurrence wins and is placed at its own position. Comments whose
/// parent is not in `flat` are left out of the result, as is everything below
/// them.
pub fn build_tree(flat: Vec<Comment>) -> Vec<CommentNode> {
    let mut owner = HashMap::with_capacity(flat.len());
    for (i, c) in flat.iter().enumerate() {
        owner.insert(c.id, i);
    }

    let mut roots = Vec::new();
    let mut children: HashMap<CommentId, Vec<usize>> = HashMap::new();
    for (i, c) in flat.iter().enumerate() {
        if owner.get(&c.id) != Some(&i) {
            continue;
        }
        match c.parent_id {
            None => roots.push(i),
            Some(parent) if owner.contains_key(&parent) => {
                children.entry(parent).or_default().push(i)
            }
            Some(_) => (), // orphan
        }
    }

    let mut slots = flat.into_iter().map(Some).collect::<Vec<_>>();
    roots
        .into_iter()
        .filter_map(|i| attach(i, &mut slots, &children))
        .collect()
}

fn attach(
    i: usize,
    slots: &mut [Option<Comment>],
    children: &HashMap<CommentId, Vec<usize>>,
) -> Option<CommentNode> {
    let comment = slots[i].take()?;
    let replies = children
        .get(&comment.id)
        .map(|kids| {
            kids.iter()
                .filter_map(|&k| attach(k, slots, children))
                .collect()
        })
        .unwrap_or_default();
    Some(CommentNode { comment, replies })
}

/// Depth-first, parents before their replies
pub fn flatten(tree: Vec<CommentNode>) -> Vec<Comment> {
    let mut res = Vec::new();
    flatten_into(tree, &mut res);
    res
}

fn flatten_into(tree: Vec<CommentNode>, res: &mut Vec<Comment>) {
    for node in tree {
        res.push(node.comment);
        flatten_into(node.replies, res);
    }
}

/// Number of comments in `tree`, at all depths
pub fn count_all(tree: &[CommentNode]) -> usize {
    tree.iter().map(|n| 1 + count_all(&n.replies)).sum()
}

pub fn find<'a>(tree: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    for n in tree {
        if n.comment.id == *id {
            return Some(n);
        }
        if let Some(res) = find(&n.replies, id) {
            return Some(res);
        }
    }
    None
}
