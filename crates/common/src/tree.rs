// Pure algorithms over self-referencing node trees.
//
// Nodes live in an arena keyed by id; structure is carried only by
// `parent_id`. Callers load the relevant `(id, parent_id)` pairs from storage
// and hand them to these functions.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub trait TreeNode {
    fn id(&self) -> Uuid;
    fn parent_id(&self) -> Option<Uuid>;
    fn order(&self) -> i32;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Circular reference: {node_id} cannot be its own parent")]
    SelfParent { node_id: Uuid },
    #[error("Circular reference: {parent_id} is a descendant of {node_id}")]
    DescendantParent { node_id: Uuid, parent_id: Uuid },
}

/// Map from node id to parent id.
pub type ParentMap = HashMap<Uuid, Option<Uuid>>;

pub fn parent_map<N: TreeNode>(nodes: &[N]) -> ParentMap {
    nodes.iter().map(|node| (node.id(), node.parent_id())).collect()
}

/// Reject a reparent that would make `node_id` its own ancestor.
///
/// Walks upward from the proposed parent. The walk is bounded by the number
/// of known nodes so pre-existing corruption cannot loop forever.
pub fn check_reparent(
    parents: &ParentMap,
    node_id: Uuid,
    proposed_parent: Option<Uuid>,
) -> Result<(), TreeError> {
    let Some(start) = proposed_parent else {
        return Ok(());
    };
    if start == node_id {
        return Err(TreeError::SelfParent { node_id });
    }

    let mut cursor = Some(start);
    let mut steps = 0usize;
    while let Some(current) = cursor {
        if current == node_id {
            return Err(TreeError::DescendantParent { node_id, parent_id: start });
        }
        steps += 1;
        if steps > parents.len() {
            break;
        }
        cursor = parents.get(&current).copied().flatten();
    }

    Ok(())
}

/// `root` followed by every descendant, breadth first.
pub fn collect_subtree(parents: &ParentMap, root: Uuid) -> Vec<Uuid> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (id, parent) in parents {
        if let Some(parent) = parent {
            children.entry(*parent).or_default().push(*id);
        }
    }

    let mut seen = HashSet::from([root]);
    let mut out = vec![root];
    let mut index = 0;
    while index < out.len() {
        if let Some(kids) = children.get(&out[index]) {
            for kid in kids {
                if seen.insert(*kid) {
                    out.push(*kid);
                }
            }
        }
        index += 1;
    }
    out
}

/// Ids from the topmost ancestor down to `target` inclusive.
pub fn ancestor_chain(parents: &ParentMap, target: Uuid) -> Vec<Uuid> {
    let mut chain = vec![target];
    let mut seen = HashSet::from([target]);
    let mut cursor = parents.get(&target).copied().flatten();
    while let Some(current) = cursor {
        if !seen.insert(current) {
            break;
        }
        chain.push(current);
        cursor = parents.get(&current).copied().flatten();
    }
    chain.reverse();
    chain
}

/// Sibling order: ascending `order`, ties broken by creation time.
pub fn sort_siblings<N: TreeNode>(nodes: &mut [N]) {
    nodes.sort_by(|a, b| a.order().cmp(&b.order()).then(a.created_at().cmp(&b.created_at())));
}

/// Resolve an inheritable flag: the nearest explicit value up the chain wins.
pub fn inherited_flag(
    parents: &ParentMap,
    explicit: &HashMap<Uuid, Option<bool>>,
    node_id: Uuid,
) -> bool {
    let mut cursor = Some(node_id);
    let mut seen = HashSet::new();
    while let Some(current) = cursor {
        if !seen.insert(current) {
            break;
        }
        if let Some(Some(value)) = explicit.get(&current) {
            return *value;
        }
        cursor = parents.get(&current).copied().flatten();
    }
    false
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForestEntry<N> {
    pub node: N,
    pub children: Vec<ForestEntry<N>>,
}

/// Group a flat node list into nested roots, preserving input order among siblings.
pub fn build_forest<N: TreeNode>(nodes: Vec<N>) -> Vec<ForestEntry<N>> {
    let mut by_parent: HashMap<Option<Uuid>, Vec<N>> = HashMap::new();
    for node in nodes {
        by_parent.entry(node.parent_id()).or_default().push(node);
    }

    fn attach<N: TreeNode>(
        parent: Option<Uuid>,
        by_parent: &mut HashMap<Option<Uuid>, Vec<N>>,
    ) -> Vec<ForestEntry<N>> {
        let Some(siblings) = by_parent.remove(&parent) else {
            return Vec::new();
        };
        siblings
            .into_iter()
            .map(|node| {
                let children = attach(Some(node.id()), by_parent);
                ForestEntry { node, children }
            })
            .collect()
    }

    attach(None, &mut by_parent)
}
