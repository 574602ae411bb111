//! RAD - anomaly detection over tabular data
//!
//! This library scores records with an Isolation Forest: an ensemble of
//! randomized partition trees in which anomalous records are isolated after
//! fewer splits than normal ones. Loading, preprocessing and Arrow IPC
//! conversion surround the engine in [`isolation`].

pub mod arrow_handler;
pub mod dataset;
pub mod engine;
pub mod inventory;
pub mod isolation;
pub mod model;
pub mod preprocess;
pub mod utils;

pub use dataset::{DataPoint, Dataset};
pub use engine::{Detection, DetectionEngine};
pub use isolation::{ForestOptions, IsolationForest, IsolationTree, Prediction, TreeScore};
pub use model::SavedModel;
pub use preprocess::{preprocess, preprocess_on, preprocess_with, FeatureMatrix, PreprocessOptions};
pub use utils::AnalysisError;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
