//! Randomized partition trees stored in an index-based arena.
//!
//! Nodes never own each other directly: an internal node refers to its
//! children by [`NodeId`], and the tree owns the whole arena. Construction
//! walks an explicit work stack, so pathological subsamples cannot exhaust
//! the call stack.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::feature::{column_ranges, validate_features};
use super::score::TreeScore;
use crate::utils::AnalysisError;

/// Identifier of a node within its tree's arena
pub type NodeId = usize;

/// A node of an [`IsolationTree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Split on `feature_index`: values `< split_value` go left, the rest right
    Internal {
        feature_index: usize,
        split_value: f64,
        size: usize,
        depth: usize,
        left: NodeId,
        right: NodeId,
    },
    /// Leaf; `size` is the number of training records that reached it
    External { size: usize, depth: usize },
}

impl Node {
    /// Number of records routed to this node at construction time
    pub fn size(&self) -> usize {
        match self {
            Node::Internal { size, .. } | Node::External { size, .. } => *size,
        }
    }

    /// Distance from the tree root
    pub fn depth(&self) -> usize {
        match self {
            Node::Internal { depth, .. } | Node::External { depth, .. } => *depth,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Node::External { .. })
    }
}

/// Height ceiling for a tree grown on `sample_size` records: `ceil(log2(sample_size))`
pub fn height_limit(sample_size: usize) -> usize {
    if sample_size <= 1 {
        0
    } else {
        (sample_size as f64).log2().ceil() as usize
    }
}

/// One randomized binary partition tree built over a data subsample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
    depth_limit: usize,
    num_features: usize,
    num_internal_nodes: usize,
    num_external_nodes: usize,
}

struct PendingNode {
    id: NodeId,
    rows: Vec<usize>,
    depth: usize,
}

impl IsolationTree {
    /// Grow a tree over every row of `data`
    ///
    /// # Arguments
    /// * `data` - Subsample to partition (rows=records, cols=features)
    /// * `depth` - Depth assigned to the root (usually 0)
    /// * `limit` - Nodes at `depth >= limit` become leaves
    /// * `rng` - Randomness source for feature and split selection
    ///
    /// # Returns
    /// * `Ok(IsolationTree)` - The immutable tree
    /// * `Err(AnalysisError)` - If `data` is empty or holds NaN/Inf values
    pub fn build<R: Rng + ?Sized>(
        data: ArrayView2<f64>,
        depth: usize,
        limit: usize,
        rng: &mut R,
    ) -> Result<Self, AnalysisError> {
        validate_features(&data)?;

        let mut tree = IsolationTree {
            nodes: Vec::with_capacity(2 * data.nrows()),
            depth_limit: limit,
            num_features: data.ncols(),
            num_internal_nodes: 0,
            num_external_nodes: 0,
        };

        let rows: Vec<usize> = (0..data.nrows()).collect();
        tree.nodes.push(Node::External { size: rows.len(), depth });
        let mut pending = vec![PendingNode { id: 0, rows, depth }];

        while let Some(PendingNode { id, rows, depth }) = pending.pop() {
            let split = if rows.len() <= 1 || depth >= limit {
                None
            } else {
                choose_split(&data, &rows, rng)
            };

            let Some((feature_index, split_value)) = split else {
                tree.nodes[id] = Node::External { size: rows.len(), depth };
                tree.num_external_nodes += 1;
                continue;
            };

            let size = rows.len();
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&row| data[[row, feature_index]] < split_value);

            let left = tree.nodes.len();
            tree.nodes.push(Node::External { size: left_rows.len(), depth: depth + 1 });
            let right = tree.nodes.len();
            tree.nodes.push(Node::External { size: right_rows.len(), depth: depth + 1 });

            tree.nodes[id] = Node::Internal {
                feature_index,
                split_value,
                size,
                depth,
                left,
                right,
            };
            tree.num_internal_nodes += 1;

            pending.push(PendingNode { id: right, rows: right_rows, depth: depth + 1 });
            pending.push(PendingNode { id: left, rows: left_rows, depth: depth + 1 });
        }

        Ok(tree)
    }

    /// Root node; always present
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Look up a node by id, e.g. a child id taken from an internal node
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Both children of an internal node, `None` for a leaf
    pub fn children(&self, node: &Node) -> Option<(&Node, &Node)> {
        match node {
            Node::Internal { left, right, .. } => Some((&self.nodes[*left], &self.nodes[*right])),
            Node::External { .. } => None,
        }
    }

    /// All nodes in allocation order (root first)
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth_limit(&self) -> usize {
        self.depth_limit
    }

    /// Number of feature columns the tree was trained on
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_internal_nodes(&self) -> usize {
        self.num_internal_nodes
    }

    pub fn num_external_nodes(&self) -> usize {
        self.num_external_nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.num_internal_nodes + self.num_external_nodes
    }

    /// Path length of `record` through this tree, tail correction included
    pub fn path_length(&self, record: ArrayView1<f64>) -> Result<f64, AnalysisError> {
        TreeScore::compute(self, record).map(|score| score.path())
    }

    /// Check the arena of a tree that did not come from [`IsolationTree::build`]
    ///
    /// Children are always allocated after their parent, so requiring
    /// `parent < child < nodes.len()` also rules out cycles.
    pub(crate) fn check_arena(&self) -> Result<(), AnalysisError> {
        if self.nodes.is_empty() {
            return Err(AnalysisError::ModelError("tree has no nodes".to_string()));
        }

        let mut internal = 0;
        for (id, node) in self.nodes.iter().enumerate() {
            let Node::Internal { feature_index, left, right, .. } = node else {
                continue;
            };
            internal += 1;
            if *feature_index >= self.num_features {
                return Err(AnalysisError::ModelError(format!(
                    "node {} splits on feature {}, tree has {} features",
                    id, feature_index, self.num_features
                )));
            }
            for child in [*left, *right] {
                if child <= id || child >= self.nodes.len() {
                    return Err(AnalysisError::ModelError(format!(
                        "node {} has invalid child {} ({} nodes)",
                        id,
                        child,
                        self.nodes.len()
                    )));
                }
            }
        }

        if internal != self.num_internal_nodes
            || self.nodes.len() - internal != self.num_external_nodes
        {
            return Err(AnalysisError::ModelError(
                "node counts do not match the arena".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pick a split feature among columns with a non-zero range over `rows`, and a
/// split value uniformly within that column's `[min, max]`.
///
/// Returns `None` when every column is constant (all rows identical).
fn choose_split<R: Rng + ?Sized>(
    data: &ArrayView2<f64>,
    rows: &[usize],
    rng: &mut R,
) -> Option<(usize, f64)> {
    let candidates: Vec<(usize, f64, f64)> = column_ranges(data, rows)
        .into_iter()
        .enumerate()
        .filter(|(_, (lo, hi))| hi > lo)
        .map(|(col, (lo, hi))| (col, lo, hi))
        .collect();

    let &(feature_index, lo, hi) = candidates.choose(rng)?;
    Some((feature_index, split_between(lo, hi, rng.gen::<f64>())))
}

/// Interpolate `u ∈ [0, 1)` into `[lo, hi]` without overflowing on extreme spans
fn split_between(lo: f64, hi: f64, u: f64) -> f64 {
    let span = hi - lo;
    let value = if span.is_finite() {
        lo + span * u
    } else {
        lo * (1.0 - u) + hi * u
    };
    value.clamp(lo, hi)
}
