use ndarray::ArrayView1;

use super::normalizer::tail_correction;
use super::tree::{IsolationTree, Node};
use crate::utils::AnalysisError;

/// Path length of a single record through a single tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeScore {
    edges: usize,
    leaf_size: usize,
    path: f64,
}

impl TreeScore {
    /// Walk `record` from the root of `tree` down to a leaf
    ///
    /// Values strictly below a node's split go left, everything else right.
    /// The leaf adds `c(leaf.size)` to the edge count to account for
    /// construction stopping before the leaf's records were isolated.
    ///
    /// # Returns
    /// * `Ok(TreeScore)` - Edge count, leaf size and corrected path length
    /// * `Err(AnalysisError::ShapeMismatch)` - If `record` has the wrong feature count
    pub fn compute(tree: &IsolationTree, record: ArrayView1<f64>) -> Result<Self, AnalysisError> {
        if record.len() != tree.num_features() {
            return Err(AnalysisError::ShapeMismatch {
                expected: tree.num_features(),
                found: record.len(),
            });
        }

        let mut node = tree.root();
        let mut edges = 0;
        while let Node::Internal { feature_index, split_value, left, right, .. } = node {
            let next = if record[*feature_index] < *split_value { *left } else { *right };
            node = &tree.nodes()[next];
            edges += 1;
        }

        let leaf_size = node.size();
        Ok(TreeScore {
            edges,
            leaf_size,
            path: edges as f64 + tail_correction(leaf_size),
        })
    }

    /// Edges traversed plus tail correction
    pub fn path(&self) -> f64 {
        self.path
    }

    pub fn edges(&self) -> usize {
        self.edges
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }
}
