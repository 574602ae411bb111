use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Schema};
use arrow::ipc::reader::StreamReader;
use ndarray::Array2;
use std::io::Cursor;
use std::sync::Arc;

use crate::isolation::feature::rows_to_matrix;
use crate::utils::AnalysisError;

/// Parsed data from Arrow IPC format
#[derive(Debug)]
pub struct ParsedData {
    pub ids: Vec<String>,
    pub columns: Vec<String>,
    pub features: Array2<f64>,
}

/// Parse Arrow IPC Stream format data
///
/// The first column must be `id` (Int64 or Utf8); every other column is a
/// Float64 feature.
///
/// # Arguments
/// * `data` - Raw bytes in Arrow IPC Stream format
///
/// # Returns
/// * `Ok(ParsedData)` with row ids and feature matrix
/// * `Err(AnalysisError)` if parsing fails or schema validation fails
pub fn parse_arrow_ipc(data: &[u8]) -> Result<ParsedData, AnalysisError> {
    if data.is_empty() {
        return Err(AnalysisError::ArrowError("empty input data".to_string()));
    }

    // Create cursor and StreamReader
    let cursor = Cursor::new(data);
    let reader = StreamReader::try_new(cursor, None)
        .map_err(|e| AnalysisError::ArrowError(format!("failed to create StreamReader: {}", e)))?;

    let schema = reader.schema();
    validate_schema(schema.clone())?;
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .skip(1)
        .map(|field| field.name().to_string())
        .collect();

    // Read all batches
    let mut all_ids: Vec<String> = Vec::new();
    let mut all_feature_rows: Vec<Vec<f64>> = Vec::new();

    for batch_result in reader {
        let batch = batch_result
            .map_err(|e| AnalysisError::ArrowError(format!("failed to read batch: {}", e)))?;

        all_ids.extend(extract_ids(batch.column(0))?);

        // Extract feature columns (all columns except first)
        let feature_columns = batch
            .columns()
            .iter()
            .skip(1)
            .map(as_float64)
            .collect::<Result<Vec<_>, _>>()?;
        for (name, column) in columns.iter().zip(&feature_columns) {
            if column.null_count() > 0 {
                return Err(AnalysisError::ArrowError(format!(
                    "feature column '{}' contains {} null values",
                    name,
                    column.null_count()
                )));
            }
        }
        for row_idx in 0..batch.num_rows() {
            all_feature_rows.push(feature_columns.iter().map(|col| col.value(row_idx)).collect());
        }
    }

    if all_ids.is_empty() {
        return Err(AnalysisError::InvalidArgument(
            "no data rows found".to_string(),
        ));
    }

    if columns.is_empty() {
        return Err(AnalysisError::InvalidArgument(
            "no feature columns found".to_string(),
        ));
    }

    let features = rows_to_matrix(&all_feature_rows)?;

    Ok(ParsedData {
        ids: all_ids,
        columns,
        features,
    })
}

/// Validate Arrow schema has required fields
fn validate_schema(schema: Arc<Schema>) -> Result<(), AnalysisError> {
    if schema.fields().is_empty() {
        return Err(AnalysisError::ArrowError(
            "schema has no fields".to_string(),
        ));
    }

    // First field must be id (Int64 or Utf8)
    let first_field = &schema.fields()[0];
    if first_field.name() != "id" {
        return Err(AnalysisError::ArrowError(format!(
            "first field must be 'id', got '{}'",
            first_field.name()
        )));
    }

    if !matches!(first_field.data_type(), DataType::Int64 | DataType::Utf8) {
        return Err(AnalysisError::ArrowError(format!(
            "id must be Int64 or Utf8, got {:?}",
            first_field.data_type()
        )));
    }

    // All other fields should be Float64 (features)
    for (idx, field) in schema.fields().iter().enumerate().skip(1) {
        if !matches!(field.data_type(), DataType::Float64) {
            return Err(AnalysisError::ArrowError(format!(
                "feature column '{}' at index {} must be Float64, got {:?}",
                field.name(),
                idx,
                field.data_type()
            )));
        }
    }

    Ok(())
}

fn extract_ids(array: &ArrayRef) -> Result<Vec<String>, AnalysisError> {
    if array.null_count() > 0 {
        return Err(AnalysisError::ArrowError(format!(
            "id column contains {} null values",
            array.null_count()
        )));
    }
    if let Some(ints) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok(ints.values().iter().map(|id| id.to_string()).collect());
    }
    if let Some(strings) = array.as_any().downcast_ref::<StringArray>() {
        return Ok((0..strings.len()).map(|i| strings.value(i).to_string()).collect());
    }
    Err(AnalysisError::ArrowError(
        "id column is neither Int64Array nor StringArray".to_string(),
    ))
}

fn as_float64(array: &ArrayRef) -> Result<&Float64Array, AnalysisError> {
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| AnalysisError::ArrowError("column is not Float64Array".to_string()))
}
