//! A built forest saved together with the feature layout it was trained on.
//!
//! Scoring new data against a saved forest only makes sense when every
//! feature lands in the column the trees split on, and categorical values
//! get the codes they had at training time. [`SavedModel`] carries both.

use log::info;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::isolation::IsolationForest;
use crate::preprocess::Mappings;
use crate::utils::AnalysisError;

/// Forest plus training column names and categorical encodings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    columns: Vec<String>,
    mappings: Mappings,
    forest: IsolationForest,
}

impl SavedModel {
    /// Pair a forest with the columns (in training order) and mappings it was built from
    pub fn new(
        columns: Vec<String>,
        mappings: Mappings,
        forest: IsolationForest,
    ) -> Result<Self, AnalysisError> {
        let model = Self {
            columns,
            mappings,
            forest,
        };
        model.check_layout()?;
        Ok(model)
    }

    /// Feature columns in training order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    pub fn forest(&self) -> &IsolationForest {
        &self.forest
    }

    /// Override the score cutoff stored with the forest
    pub fn set_anomaly_threshold(&mut self, threshold: f64) -> Result<(), AnalysisError> {
        self.forest.set_anomaly_threshold(threshold)
    }

    /// Reorder the columns of `features` (named by `columns`) into training order
    ///
    /// # Returns
    /// * `Ok(Array2)` - Matrix whose columns match [`SavedModel::columns`]
    /// * `Err(AnalysisError::MalformedInput)` - If a training column is absent
    pub fn align(
        &self,
        columns: &[String],
        features: ArrayView2<f64>,
    ) -> Result<Array2<f64>, AnalysisError> {
        if columns.len() != features.ncols() {
            return Err(AnalysisError::ShapeMismatch {
                expected: columns.len(),
                found: features.ncols(),
            });
        }

        let positions = self
            .columns
            .iter()
            .map(|name| {
                columns.iter().position(|column| column == name).ok_or_else(|| {
                    AnalysisError::MalformedInput(format!(
                        "column `{}` used by the model is missing",
                        name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(features.select(Axis(1), &positions))
    }

    pub fn to_json(&self) -> Result<String, AnalysisError> {
        serde_json::to_string(self)
            .map_err(|e| AnalysisError::ModelError(format!("failed to serialize model: {}", e)))
    }

    /// Restore a model written by [`SavedModel::to_json`]
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let model: Self = serde_json::from_str(json)
            .map_err(|e| AnalysisError::ModelError(format!("failed to deserialize model: {}", e)))?;
        model.forest.validate()?;
        model.check_layout()?;
        info!(
            "[SavedModel] Loaded forest with {} trees over columns {:?}",
            model.forest.num_trees(),
            model.columns
        );
        Ok(model)
    }

    fn check_layout(&self) -> Result<(), AnalysisError> {
        if self.columns.len() != self.forest.num_features() {
            return Err(AnalysisError::ModelError(format!(
                "model names {} columns, forest has {} features",
                self.columns.len(),
                self.forest.num_features()
            )));
        }
        if let Some(column) = self.mappings.keys().find(|key| !self.columns.contains(key)) {
            return Err(AnalysisError::ModelError(format!(
                "mapping for unknown column `{}`",
                column
            )));
        }
        Ok(())
    }
}
