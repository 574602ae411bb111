/// Isolation Forest engine: normalization, trees, per-tree scoring and the ensemble
pub mod feature;
pub mod forest;
pub mod normalizer;
pub mod score;
pub mod tree;

// Re-export commonly used types
pub use forest::{ForestOptions, IsolationForest, Prediction};
pub use normalizer::{anomaly_score, expected_path_length};
pub use score::TreeScore;
pub use tree::{height_limit, IsolationTree, Node, NodeId};
