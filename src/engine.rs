use log::info;
use std::collections::HashMap;

use crate::dataset::Dataset;
use crate::isolation::{ForestOptions, IsolationForest, Prediction};
use crate::model::SavedModel;
use crate::preprocess::{
    preprocess, preprocess_on, preprocess_with, FeatureMatrix, Mappings, PreprocessOptions,
};
use crate::utils::AnalysisError;

/// The main detection engine: a registry of named datasets and the pipeline
/// that preprocesses, builds a forest and scores them
#[derive(Debug)]
pub struct DetectionEngine {
    datasets: HashMap<String, Dataset>,
}

/// Outcome of running detection over one (pre)processed table
#[derive(Debug, Clone)]
pub struct Detection {
    pub matrix: FeatureMatrix,
    pub mappings: Mappings,
    pub forest: IsolationForest,
    pub predictions: Vec<Prediction>,
}

impl Detection {
    /// Predictions flagged anomalous, in input order
    pub fn anomalies(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.iter().filter(|p| p.is_anomalous)
    }

    /// The forest together with the column layout needed to score new data
    pub fn to_model(&self) -> Result<SavedModel, AnalysisError> {
        SavedModel::new(
            self.matrix.columns.clone(),
            self.mappings.clone(),
            self.forest.clone(),
        )
    }
}

/// Detection for one group produced by [`DetectionEngine::detect_grouped`]
#[derive(Debug, Clone)]
pub struct GroupDetection {
    pub key: String,
    pub detection: Detection,
}

impl DetectionEngine {
    /// Create a new detection engine
    pub fn new() -> Self {
        Self {
            datasets: HashMap::new(),
        }
    }

    /// Add a dataset to the engine
    pub fn add_dataset(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.name.clone(), dataset);
    }

    /// Get a dataset by name
    pub fn get_dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    /// Remove a dataset from the engine
    pub fn remove_dataset(&mut self, name: &str) -> Option<Dataset> {
        self.datasets.remove(name)
    }

    /// Get all dataset names
    pub fn list_datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get a summary of all datasets
    pub fn summary(&self) -> Vec<DatasetSummary> {
        let mut summaries: Vec<DatasetSummary> = self
            .datasets
            .values()
            .map(|dataset| DatasetSummary {
                name: dataset.name.clone(),
                record_count: dataset.len(),
                fields: dataset.get_field_names(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Preprocess a dataset, build a forest on it and score every row
    pub fn detect(
        &self,
        dataset_name: &str,
        preprocess_options: &PreprocessOptions,
        forest_options: &ForestOptions,
    ) -> Result<Detection, AnalysisError> {
        let dataset = self.require_dataset(dataset_name)?;
        let (matrix, mappings) = preprocess(dataset, preprocess_options)?;
        run_detection(matrix, mappings, forest_options)
    }

    /// Like [`DetectionEngine::detect`], but with one forest per group of the `on` columns
    pub fn detect_grouped(
        &self,
        dataset_name: &str,
        on: &[String],
        min_records: usize,
        preprocess_options: &PreprocessOptions,
        forest_options: &ForestOptions,
    ) -> Result<Vec<GroupDetection>, AnalysisError> {
        let dataset = self.require_dataset(dataset_name)?;
        let groups = preprocess_on(dataset, on, min_records, preprocess_options)?;
        info!(
            "[DetectionEngine] '{}' split into {} groups on {:?}",
            dataset_name,
            groups.len(),
            on
        );

        groups
            .into_iter()
            .map(|group| -> Result<GroupDetection, AnalysisError> {
                Ok(GroupDetection {
                    key: group.key,
                    detection: run_detection(group.matrix, group.mappings, forest_options)?,
                })
            })
            .collect()
    }

    /// Score a dataset against a saved model, encoding it with the model's columns and mappings
    pub fn score_with(
        &self,
        dataset_name: &str,
        preprocess_options: &PreprocessOptions,
        model: &SavedModel,
    ) -> Result<Vec<Prediction>, AnalysisError> {
        let dataset = self.require_dataset(dataset_name)?;
        let matrix = preprocess_with(
            dataset,
            preprocess_options,
            model.columns(),
            model.mappings(),
        )?;
        model
            .forest()
            .predict_labeled(matrix.features.view(), &matrix.ids)
    }

    fn require_dataset(&self, name: &str) -> Result<&Dataset, AnalysisError> {
        self.get_dataset(name)
            .ok_or_else(|| AnalysisError::InvalidArgument(format!("unknown dataset '{}'", name)))
    }
}

fn run_detection(
    matrix: FeatureMatrix,
    mappings: Mappings,
    options: &ForestOptions,
) -> Result<Detection, AnalysisError> {
    let forest = IsolationForest::build(matrix.features.view(), options)?;
    let predictions = forest.predict_labeled(matrix.features.view(), &matrix.ids)?;
    Ok(Detection {
        matrix,
        mappings,
        forest,
        predictions,
    })
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary information about a dataset
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub name: String,
    pub record_count: usize,
    pub fields: Vec<String>,
}
