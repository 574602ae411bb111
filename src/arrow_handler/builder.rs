use arrow::array::{ArrayRef, BooleanArray, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::isolation::Prediction;
use crate::utils::AnalysisError;

/// Build Arrow IPC result for anomaly predictions
///
/// # Arguments
/// * `predictions` - One prediction per scored row, in input order
///
/// # Returns
/// * `Ok(Vec<u8>)` - Arrow IPC Stream format bytes
/// * `Err(AnalysisError)` - If building fails
pub fn build_prediction_result(predictions: &[Prediction]) -> Result<Vec<u8>, AnalysisError> {
    // Define schema (order fixed: id, depth, score, is_anomalous)
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("depth", DataType::Float64, false),
        Field::new("score", DataType::Float64, false),
        Field::new("is_anomalous", DataType::Boolean, false),
    ]));

    // Build arrays
    let id_array = Arc::new(StringArray::from_iter_values(
        predictions.iter().map(|p| p.id.as_str()),
    )) as ArrayRef;
    let depth_array = Arc::new(Float64Array::from_iter_values(
        predictions.iter().map(|p| p.depth),
    )) as ArrayRef;
    let score_array = Arc::new(Float64Array::from_iter_values(
        predictions.iter().map(|p| p.score),
    )) as ArrayRef;
    let label_array = Arc::new(BooleanArray::from(
        predictions.iter().map(|p| p.is_anomalous).collect::<Vec<_>>(),
    )) as ArrayRef;

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![id_array, depth_array, score_array, label_array],
    )
    .map_err(|e| AnalysisError::ArrowError(format!("failed to create RecordBatch: {}", e)))?;

    // Write to IPC Stream format
    serialize_to_ipc(schema, batch)
}

/// Serialize RecordBatch to Arrow IPC Stream format
fn serialize_to_ipc(schema: Arc<Schema>, batch: RecordBatch) -> Result<Vec<u8>, AnalysisError> {
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, &schema).map_err(|e| {
            AnalysisError::ArrowError(format!("failed to create StreamWriter: {}", e))
        })?;
        writer
            .write(&batch)
            .map_err(|e| AnalysisError::ArrowError(format!("failed to write batch: {}", e)))?;
        writer
            .finish()
            .map_err(|e| AnalysisError::ArrowError(format!("failed to finish writer: {}", e)))?;
    }
    Ok(buffer)
}
