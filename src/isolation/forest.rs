use log::{debug, info, warn};
use ndarray::{ArrayView2, Axis};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::feature::{validate_features, validate_prediction_input};
use super::normalizer::anomaly_score;
use super::tree::{height_limit, IsolationTree};
use crate::utils::{validate_threshold, AnalysisError};

/// Default number of trees in the ensemble
pub const DEFAULT_NUM_TREES: usize = 100;

/// Default subsample ceiling; smaller datasets use every row
pub const DEFAULT_SAMPLE_SIZE: usize = 256;

/// Default score cutoff; scores at or above it are anomalous
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.5;

/// Isolation Forest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestOptions {
    /// `num_trees` is the number of trees to be created.
    pub num_trees: usize,

    /// `sample_size` is the number of rows drawn (without replacement) for each tree.
    /// `None` means `min(256, rows)`; larger values are clamped to the row count.
    pub sample_size: Option<usize>,

    /// Records scoring at or above this value are flagged anomalous.
    pub anomaly_threshold: f64,

    /// Seed for reproducible builds; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self {
            num_trees: DEFAULT_NUM_TREES,
            sample_size: None,
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            seed: None,
        }
    }
}

impl ForestOptions {
    /// Check the options against a dataset of `num_rows` rows and resolve the subsample size
    pub fn resolve_sample_size(&self, num_rows: usize) -> Result<usize, AnalysisError> {
        if self.num_trees == 0 {
            return Err(AnalysisError::InvalidArgument(
                "num_trees must be > 0".to_string(),
            ));
        }
        validate_threshold(self.anomaly_threshold)?;

        let requested = self.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE.min(num_rows));
        if requested <= 1 {
            return Err(AnalysisError::InvalidArgument(format!(
                "sample_size must be > 1, got {}",
                requested
            )));
        }

        if requested > num_rows {
            warn!(
                "[IsolationForest] sample_size {} exceeds {} available rows; using {}",
                requested, num_rows, num_rows
            );
        }
        let sample_size = requested.min(num_rows);
        if sample_size <= 1 {
            return Err(AnalysisError::InvalidArgument(format!(
                "need at least 2 rows to build a forest, got {}",
                num_rows
            )));
        }
        Ok(sample_size)
    }
}

/// Prediction for one input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    /// Average path length across all trees
    pub depth: f64,
    pub score: f64,
    pub is_anomalous: bool,
}

/// An ensemble of isolation trees, immutable once built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    num_features: usize,
    anomaly_threshold: f64,
}

impl IsolationForest {
    /// Build a forest, seeding from `options.seed` or from OS entropy
    pub fn build(data: ArrayView2<f64>, options: &ForestOptions) -> Result<Self, AnalysisError> {
        let mut rng = match options.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::build_with_rng(data, options, &mut rng)
    }

    /// Build a forest drawing every subsample and split from `rng`
    ///
    /// # Arguments
    /// * `data` - Training matrix (rows=records, cols=numeric features)
    /// * `options` - Ensemble size, subsample size and anomaly threshold
    /// * `rng` - Randomness source; a seeded generator makes builds reproducible
    ///
    /// # Returns
    /// * `Ok(IsolationForest)` - Fully built ensemble of `options.num_trees` trees
    /// * `Err(AnalysisError::InvalidArgument)` - Bad configuration or unusable data
    pub fn build_with_rng<R: Rng + ?Sized>(
        data: ArrayView2<f64>,
        options: &ForestOptions,
        rng: &mut R,
    ) -> Result<Self, AnalysisError> {
        let sample_size = options.resolve_sample_size(data.nrows())?;
        validate_features(&data)?;

        let limit = height_limit(sample_size);
        info!(
            "[IsolationForest] Building {} trees over {}x{} samples, sample={}, height_limit={}",
            options.num_trees,
            data.nrows(),
            data.ncols(),
            sample_size,
            limit
        );

        let mut trees = Vec::with_capacity(options.num_trees);
        for _ in 0..options.num_trees {
            let rows = index::sample(rng, data.nrows(), sample_size).into_vec();
            let subsample = data.select(Axis(0), &rows);
            trees.push(IsolationTree::build(subsample.view(), 0, limit, rng)?);
        }

        debug!(
            "[IsolationForest] Forest built, {} nodes in total",
            trees.iter().map(IsolationTree::num_nodes).sum::<usize>()
        );

        Ok(Self {
            trees,
            sample_size,
            num_features: data.ncols(),
            anomaly_threshold: options.anomaly_threshold,
        })
    }

    /// Score every row of `data`, ids are positional (`"0"`, `"1"`, ...)
    pub fn predict(&self, data: ArrayView2<f64>) -> Result<Vec<Prediction>, AnalysisError> {
        let ids: Vec<String> = (0..data.nrows()).map(|i| i.to_string()).collect();
        self.predict_labeled(data, &ids)
    }

    /// Score every row of `data`, labelling each prediction with the matching entry of `ids`
    ///
    /// # Returns
    /// * `Ok(predictions)` - One prediction per row, in input order
    /// * `Err(AnalysisError::ShapeMismatch)` - Wrong feature count, or `ids` not one per row
    pub fn predict_labeled(
        &self,
        data: ArrayView2<f64>,
        ids: &[String],
    ) -> Result<Vec<Prediction>, AnalysisError> {
        validate_prediction_input(&data, self.num_features)?;
        if ids.len() != data.nrows() {
            return Err(AnalysisError::ShapeMismatch {
                expected: data.nrows(),
                found: ids.len(),
            });
        }

        let predictions = data
            .rows()
            .into_iter()
            .zip(ids)
            .map(|(row, id)| -> Result<Prediction, AnalysisError> {
                let mut total = 0.0;
                for tree in &self.trees {
                    total += tree.path_length(row)?;
                }
                let depth = total / self.trees.len() as f64;
                let score = anomaly_score(depth, self.sample_size as i64)?;
                Ok(Prediction {
                    id: id.clone(),
                    depth,
                    score,
                    is_anomalous: score >= self.anomaly_threshold,
                })
            })
            .collect::<Result<Vec<_>, AnalysisError>>()?;

        let anomaly_count = predictions.iter().filter(|p| p.is_anomalous).count();
        info!(
            "[IsolationForest] Scored {} records, {} anomalies detected",
            predictions.len(),
            anomaly_count
        );

        Ok(predictions)
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Subsample size used at build time; the reference `n` of the anomaly score
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn anomaly_threshold(&self) -> f64 {
        self.anomaly_threshold
    }

    /// Opaque serialization of the built ensemble
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        serde_json::to_string(self)
            .map_err(|e| AnalysisError::ModelError(format!("failed to serialize forest: {}", e)))
    }

    /// Restore an ensemble written by [`IsolationForest::to_json`]
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let forest: Self = serde_json::from_str(json).map_err(|e| {
            AnalysisError::ModelError(format!("failed to deserialize forest: {}", e))
        })?;
        forest.validate()?;
        Ok(forest)
    }

    /// Replace the score cutoff of an already-built forest
    pub fn set_anomaly_threshold(&mut self, threshold: f64) -> Result<(), AnalysisError> {
        validate_threshold(threshold)?;
        self.anomaly_threshold = threshold;
        Ok(())
    }

    /// Check a deserialized forest before it is used for scoring
    pub(crate) fn validate(&self) -> Result<(), AnalysisError> {
        if self.trees.is_empty() || self.sample_size <= 1 {
            return Err(AnalysisError::ModelError(
                "serialized forest has no trees or an invalid sample size".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.anomaly_threshold) {
            return Err(AnalysisError::ModelError(format!(
                "anomaly threshold must be 0-1, got {}",
                self.anomaly_threshold
            )));
        }

        for (idx, tree) in self.trees.iter().enumerate() {
            if tree.num_features() != self.num_features {
                return Err(AnalysisError::ModelError(format!(
                    "tree {} has {} features, forest has {}",
                    idx,
                    tree.num_features(),
                    self.num_features
                )));
            }
            tree.check_arena()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    fn random_matrix(seed: u64, rows: usize, cols: usize) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0..1000) as f64)
    }

    fn options(num_trees: usize, sample_size: Option<usize>) -> ForestOptions {
        ForestOptions {
            num_trees,
            sample_size,
            seed: Some(7),
            ..ForestOptions::default()
        }
    }

    #[test]
    fn test_correct_number_of_trees_made() {
        let data = random_matrix(1, 60, 3);
        for num_trees in [1, 10, 100] {
            let forest = IsolationForest::build(data.view(), &options(num_trees, None)).unwrap();
            assert_eq!(forest.num_trees(), num_trees);
            assert_eq!(forest.trees().len(), num_trees);
        }
    }

    #[test]
    fn test_default_sample_size() {
        let small = random_matrix(2, 40, 2);
        let forest = IsolationForest::build(small.view(), &options(5, None)).unwrap();
        assert_eq!(forest.sample_size(), 40);

        let large = random_matrix(3, 300, 2);
        let forest = IsolationForest::build(large.view(), &options(5, None)).unwrap();
        assert_eq!(forest.sample_size(), 256);
        assert!(forest.trees().iter().all(|t| t.depth_limit() == 8));
        assert!(forest.trees().iter().all(|t| t.root().size() == 256));
    }

    #[test]
    fn test_oversized_sample_is_clamped() {
        let data = random_matrix(4, 20, 2);
        let forest = IsolationForest::build(data.view(), &options(3, Some(500))).unwrap();
        assert_eq!(forest.sample_size(), 20);
    }

    #[test]
    fn test_invalid_configuration() {
        let data = random_matrix(5, 20, 2);
        assert!(matches!(
            IsolationForest::build(data.view(), &options(0, None)),
            Err(AnalysisError::InvalidArgument(_))
        ));
        assert!(matches!(
            IsolationForest::build(data.view(), &options(10, Some(1))),
            Err(AnalysisError::InvalidArgument(_))
        ));
        assert!(matches!(
            IsolationForest::build(data.view(), &options(10, Some(0))),
            Err(AnalysisError::InvalidArgument(_))
        ));

        let single_row = arr2(&[[1.0, 2.0]]);
        assert!(IsolationForest::build(single_row.view(), &options(10, None)).is_err());

        let bad_threshold = ForestOptions {
            anomaly_threshold: 1.5,
            ..options(10, None)
        };
        assert!(IsolationForest::build(data.view(), &bad_threshold).is_err());
    }

    #[test]
    fn test_predict_length_equals_input_length() {
        let data = random_matrix(6, 75, 4);
        let forest = IsolationForest::build(data.view(), &options(20, None)).unwrap();
        let predictions = forest.predict(data.view()).unwrap();

        assert_eq!(predictions.len(), 75);
        for (i, prediction) in predictions.iter().enumerate() {
            assert_eq!(prediction.id, i.to_string());
            assert!((0.0..=1.0).contains(&prediction.score));
            assert!(prediction.depth >= 0.0);
            assert_eq!(prediction.is_anomalous, prediction.score >= 0.5);
        }
    }

    #[test]
    fn test_predict_with_labels() {
        let data = random_matrix(7, 10, 2);
        let forest = IsolationForest::build(data.view(), &options(10, None)).unwrap();
        let ids: Vec<String> = (0..10).map(|i| format!("host-{}", i)).collect();

        let predictions = forest.predict_labeled(data.view(), &ids).unwrap();
        assert_eq!(predictions[3].id, "host-3");

        let result = forest.predict_labeled(data.view(), &ids[..4]);
        assert!(matches!(result, Err(AnalysisError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_predict_shape_mismatch() {
        let data = random_matrix(8, 30, 3);
        let forest = IsolationForest::build(data.view(), &options(10, None)).unwrap();
        let narrow = random_matrix(9, 5, 2);

        assert_eq!(
            forest.predict(narrow.view()),
            Err(AnalysisError::ShapeMismatch { expected: 3, found: 2 })
        );
    }

    #[test]
    fn test_extreme_records_are_anomalous() {
        let data = random_matrix(10, 80, 4);
        let forest = IsolationForest::build(data.view(), &options(100, None)).unwrap();

        let high = Array2::from_elem((1, 4), f64::MAX);
        let low = Array2::from_elem((1, 4), f64::MIN);
        assert!(forest.predict(high.view()).unwrap().iter().all(|p| p.is_anomalous));
        assert!(forest.predict(low.view()).unwrap().iter().all(|p| p.is_anomalous));
    }

    #[test]
    fn test_outlier_scores_above_inliers() {
        let mut rows: Vec<Vec<f64>> = (0..50)
            .map(|i| vec![(i % 10) as f64, (i / 10) as f64])
            .collect();
        rows.push(vec![500.0, 500.0]);
        let data = crate::isolation::feature::rows_to_matrix(&rows).unwrap();

        let forest = IsolationForest::build(data.view(), &options(100, None)).unwrap();
        let predictions = forest.predict(data.view()).unwrap();
        let outlier = predictions[50].score;
        assert!(predictions[..50].iter().all(|p| p.score < outlier));
    }

    #[test]
    fn test_end_to_end_fifty_by_five() {
        let data = random_matrix(11, 50, 5);
        let forest = IsolationForest::build(data.view(), &options(50, Some(32))).unwrap();
        assert_eq!(forest.num_trees(), 50);

        let predictions = forest.predict(data.view()).unwrap();
        assert_eq!(predictions.len(), 50);
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(&p.score)));

        let extreme = Array2::from_elem((3, 5), f64::MAX);
        let predictions = forest.predict(extreme.view()).unwrap();
        assert_eq!(predictions.len(), 3);
        assert!(predictions.iter().all(|p| p.is_anomalous));
    }

    #[test]
    fn test_custom_threshold() {
        let data = random_matrix(12, 40, 2);
        let strict = ForestOptions {
            anomaly_threshold: 1.0,
            ..options(10, None)
        };
        let forest = IsolationForest::build(data.view(), &strict).unwrap();
        assert_eq!(forest.anomaly_threshold(), 1.0);
        assert!(forest.predict(data.view()).unwrap().iter().all(|p| !p.is_anomalous));
    }

    #[test]
    fn test_seeded_builds_are_reproducible() {
        let data = random_matrix(13, 40, 3);
        let a = IsolationForest::build(data.view(), &options(10, None)).unwrap();
        let b = IsolationForest::build(data.view(), &options(10, None)).unwrap();
        assert_eq!(a.predict(data.view()).unwrap(), b.predict(data.view()).unwrap());
    }

    #[test]
    fn test_json_round_trip_preserves_scores() {
        let data = random_matrix(14, 40, 3);
        let forest = IsolationForest::build(data.view(), &options(10, None)).unwrap();
        let restored = IsolationForest::from_json(&forest.to_json().unwrap()).unwrap();

        assert_eq!(restored.num_trees(), 10);
        assert_eq!(
            forest.predict(data.view()).unwrap(),
            restored.predict(data.view()).unwrap()
        );
        assert!(IsolationForest::from_json("{}").is_err());
    }

    /// Save a small forest, apply `edit` to its JSON and load it back
    fn corrupted(
        edit: impl FnOnce(&mut serde_json::Value),
    ) -> Result<IsolationForest, AnalysisError> {
        let data = random_matrix(15, 40, 3);
        let forest = IsolationForest::build(data.view(), &options(5, None)).unwrap();
        let mut value: serde_json::Value =
            serde_json::from_str(&forest.to_json().unwrap()).unwrap();
        edit(&mut value);
        IsolationForest::from_json(&value.to_string())
    }

    #[test]
    fn test_from_json_rejects_out_of_range_child() {
        let result = corrupted(|v| {
            v["trees"][0]["nodes"][0]["Internal"]["left"] = 999_999.into();
        });
        assert!(matches!(result, Err(AnalysisError::ModelError(_))));
    }

    #[test]
    fn test_from_json_rejects_child_pointing_backwards() {
        let result = corrupted(|v| {
            v["trees"][0]["nodes"][0]["Internal"]["right"] = 0.into();
        });
        assert!(matches!(result, Err(AnalysisError::ModelError(_))));
    }

    #[test]
    fn test_from_json_rejects_unknown_feature() {
        let result = corrupted(|v| {
            v["trees"][0]["nodes"][0]["Internal"]["feature_index"] = 7.into();
        });
        assert!(matches!(result, Err(AnalysisError::ModelError(_))));
    }

    #[test]
    fn test_from_json_rejects_empty_tree() {
        let result = corrupted(|v| v["trees"][1]["nodes"] = serde_json::json!([]));
        assert!(matches!(result, Err(AnalysisError::ModelError(_))));
    }

    #[test]
    fn test_from_json_rejects_feature_count_mismatch() {
        let result = corrupted(|v| v["num_features"] = 4.into());
        assert!(matches!(result, Err(AnalysisError::ModelError(_))));
    }

    #[test]
    fn test_from_json_rejects_bad_threshold() {
        let result = corrupted(|v| v["anomaly_threshold"] = 1.5.into());
        assert!(matches!(result, Err(AnalysisError::ModelError(_))));
        assert!(corrupted(|_| {}).is_ok());
    }

    #[test]
    fn test_set_anomaly_threshold() {
        let data = random_matrix(16, 40, 2);
        let mut forest = IsolationForest::build(data.view(), &options(10, None)).unwrap();
        forest.set_anomaly_threshold(1.0).unwrap();
        assert!(forest.predict(data.view()).unwrap().iter().all(|p| !p.is_anomalous));
        forest.set_anomaly_threshold(0.0).unwrap();
        assert!(forest.predict(data.view()).unwrap().iter().all(|p| p.is_anomalous));
        assert!(forest.set_anomaly_threshold(-0.1).is_err());
    }

    #[test]
    fn test_forest_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IsolationForest>();
    }
}
