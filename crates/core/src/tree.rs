//! Pipeline forest reconstructed from the flat, parent-pointer storage format.
//!
//! The flat node list is the arena; children and roots are index lists computed
//! by [`build_tree`]. Persisting always goes back through [`flatten_tree`], so the
//! stored shape stays a plain list with `parentId` references.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::domain::node::{PipelineId, PipelineNode};
use crate::errors::TreeError;

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineTree {
    nodes: Vec<PipelineNode>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    max_depth: usize,
}

impl Default for PipelineTree {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            children: Vec::new(),
            roots: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

pub fn build_tree(flat: Vec<PipelineNode>) -> Result<PipelineTree, TreeError> {
    build_tree_with_depth(flat, DEFAULT_MAX_DEPTH)
}

/// Groups nodes under their parents. A `parent_id` that matches no node in the
/// list makes that node a root.
pub fn build_tree_with_depth(
    flat: Vec<PipelineNode>,
    max_depth: usize,
) -> Result<PipelineTree, TreeError> {
    let mut index = HashMap::with_capacity(flat.len());
    for (position, node) in flat.iter().enumerate() {
        if index.insert(node.id.clone(), position).is_some() {
            return Err(TreeError::DuplicateNode(node.id.clone()));
        }
    }

    let parents: Vec<Option<usize>> = flat
        .iter()
        .map(|node| {
            let parent = node.parent_id.as_ref()?;
            let position = index.get(parent).copied();
            if position.is_none() {
                warn!(
                    event_name = "pipeline.tree.orphan_promoted",
                    pipeline_id = %node.id,
                    parent_id = %parent,
                    "parent not found; promoting to root"
                );
            }
            position
        })
        .collect();

    for start in 0..flat.len() {
        let mut seen = HashSet::from([start]);
        let mut depth = 0;
        let mut current = parents[start];
        while let Some(parent) = current {
            if !seen.insert(parent) {
                return Err(TreeError::Cycle(flat[start].id.clone()));
            }
            depth += 1;
            if depth > max_depth {
                return Err(TreeError::TooDeep { pipeline_id: flat[start].id.clone(), max_depth });
            }
            current = parents[parent];
        }
    }

    let mut children = vec![Vec::new(); flat.len()];
    let mut roots = Vec::new();
    for (position, parent) in parents.iter().enumerate() {
        match parent {
            Some(parent) => children[*parent].push(position),
            None => roots.push(position),
        }
    }

    Ok(PipelineTree { nodes: flat, children, roots, max_depth })
}

/// Depth-first, pre-order listing of every node. Inverse of [`build_tree`] up to
/// ordering.
pub fn flatten_tree(tree: &PipelineTree) -> Vec<PipelineNode> {
    tree.depth_first().cloned().collect()
}

pub fn find_by_id<'a>(tree: &'a PipelineTree, id: &PipelineId) -> Option<&'a PipelineNode> {
    tree.depth_first().find(|node| &node.id == id)
}

/// Replaces the node with `updated.id`, wherever it sits. Unknown ids leave the
/// tree untouched; callers check [`find_by_id`] first.
pub fn update_in_tree(tree: PipelineTree, updated: PipelineNode) -> PipelineTree {
    let Some(position) = tree.position(&updated.id) else {
        return tree;
    };

    if tree.nodes[position].parent_id == updated.parent_id {
        let mut tree = tree;
        tree.nodes[position] = updated;
        return tree;
    }

    let mut flat = tree.nodes.clone();
    flat[position] = updated;
    match build_tree_with_depth(flat, tree.max_depth) {
        Ok(rebuilt) => rebuilt,
        Err(error) => {
            warn!(
                event_name = "pipeline.tree.reparent_refused",
                pipeline_id = %tree.nodes[position].id,
                error = %error,
                "refusing re-parent that would break the tree"
            );
            tree
        }
    }
}

impl PipelineTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn roots(&self) -> impl Iterator<Item = &PipelineNode> + '_ {
        self.roots.iter().map(|index| &self.nodes[*index])
    }

    pub fn children_of(&self, id: &PipelineId) -> Vec<&PipelineNode> {
        self.position(id)
            .map(|position| self.children[position].iter().map(|child| &self.nodes[*child]).collect())
            .unwrap_or_default()
    }


    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst { tree: self, stack: self.roots.iter().rev().copied().collect() }
    }

    /// Adds a node, re-validating parent links.
    pub fn insert(&mut self, node: PipelineNode) -> Result<(), TreeError> {
        let mut flat = self.nodes.clone();
        flat.push(node);
        *self = build_tree_with_depth(flat, self.max_depth)?;
        Ok(())
    }

    fn position(&self, id: &PipelineId) -> Option<usize> {
        self.nodes.iter().position(|node| &node.id == id)
    }
}

pub struct DepthFirst<'a> {
    tree: &'a PipelineTree,
    stack: Vec<usize>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a PipelineNode;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.stack.pop()?;
        self.stack.extend(self.tree.children[position].iter().rev().copied());
        Some(&self.tree.nodes[position])
    }
}
