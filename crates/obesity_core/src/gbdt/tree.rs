//! Decision tree structures for ensemble inference
//!
//! Thresholds and leaf values are fixed-point integers at `SCALE`
//! precision, so traversal is exact and platform independent.

use serde::{Deserialize, Serialize};

/// A decision tree node (internal or leaf)
///
/// Internal nodes have `feature_idx >= 0` and child indices; leaves have
/// `feature_idx == -1` and a `leaf` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: i32,

    /// Left child index (-1 for leaf nodes)
    pub left: i32,

    /// Right child index (-1 for leaf nodes)
    pub right: i32,

    /// Feature column to split on (-1 for leaf nodes)
    pub feature_idx: i32,

    /// Go left when `feature <= threshold` (fixed-point)
    pub threshold: i64,

    /// Leaf value in fixed-point (Some only for leaves)
    pub leaf: Option<i64>,
}

impl Node {
    pub fn internal(id: i32, feature_idx: i32, threshold: i64, left: i32, right: i32) -> Self {
        Self {
            id,
            left,
            right,
            feature_idx,
            threshold,
            leaf: None,
        }
    }

    pub fn leaf(id: i32, value: i64) -> Self {
        Self {
            id,
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature_idx == -1 || self.leaf.is_some()
    }

    pub fn leaf_value(&self) -> Option<i64> {
        self.leaf
    }
}

/// A single regression tree. `weight` is the shrinkage applied to its leaves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tree {
    /// Node 0 is the root
    pub nodes: Vec<Node>,

    /// Fixed-point multiplier for leaf values
    pub weight: i64,
}

impl Tree {
    pub fn new(nodes: Vec<Node>, weight: i64) -> Self {
        Self { nodes, weight }
    }

    /// Single-leaf tree
    pub fn constant(value: i64, weight: i64) -> Self {
        Self::new(vec![Node::leaf(0, value)], weight)
    }

    /// Leaf value reached by `features`. Malformed structure yields 0.
    pub fn evaluate(&self, features: &[i64]) -> i64 {
        let mut idx = 0usize;

        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0;
            };

            if node.is_leaf() {
                return node.leaf_value().unwrap_or(0);
            }

            let Some(&feature_value) = features.get(node.feature_idx as usize) else {
                return 0;
            };

            let next = if feature_value <= node.threshold {
                node.left
            } else {
                node.right
            };
            if next < 0 || next as usize >= self.nodes.len() || next as usize <= idx {
                return 0;
            }
            idx = next as usize;
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Length of the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize, guard: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() && guard < nodes.len() => {
                    1 + walk(nodes, node.left as usize, guard + 1)
                        .max(walk(nodes, node.right as usize, guard + 1))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0, 0)
    }

    /// Validate tree structure
    ///
    /// Children must point forward so traversal always terminates.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if !node.is_leaf() {
                for (side, child) in [("left", node.left), ("right", node.right)] {
                    if child < 0 || child as usize >= self.nodes.len() || child as usize <= i {
                        return Err(format!("Node {i} has invalid {side} child: {child}"));
                    }
                }

                if node.feature_idx < 0 {
                    return Err(format!(
                        "Internal node {} has invalid feature index: {}",
                        i, node.feature_idx
                    ));
                }
            } else if node.leaf.is_none() {
                return Err(format!("Leaf node {i} has no leaf value"));
            }
        }

        Ok(())
    }

    /// Highest feature index referenced by any split
    pub fn max_feature_idx(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .map(|n| n.feature_idx as usize)
            .max()
    }
}
