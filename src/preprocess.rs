//! Turns a loaded [`Dataset`] into the purely numeric matrix the forest consumes.
//!
//! Row identifiers come from index columns, unwanted columns are dropped and
//! non-numeric columns are replaced by categorical codes.

use log::debug;
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};

use crate::dataset::Dataset;
use crate::utils::{parse_numeric, AnalysisError};

/// Value written for a missing cell, numeric or categorical
pub const MISSING_VALUE: f64 = -1.0;

/// Category → code mapping for every encoded column
pub type Mappings = BTreeMap<String, BTreeMap<String, usize>>;

/// Which columns identify rows and which to discard
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessOptions {
    /// Columns whose values form the row id; joined with `,` when several
    pub index: Vec<String>,
    /// Columns removed before encoding
    pub drop: Vec<String>,
}

/// Numeric features plus the labels needed to report on them
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub ids: Vec<String>,
    /// Name of the id column(s), `None` for positional ids
    pub index_name: Option<String>,
    pub columns: Vec<String>,
    pub features: Array2<f64>,
}

/// One chunk produced by [`preprocess_on`]
#[derive(Debug, Clone)]
pub struct GroupMatrix {
    /// Values of the grouping columns, joined with `,`
    pub key: String,
    pub matrix: FeatureMatrix,
    pub mappings: Mappings,
}

/// Set row ids, drop columns and encode non-numeric columns as integers
///
/// # Arguments
/// * `dataset` - Table to convert
/// * `options` - Index and drop columns
///
/// # Returns
/// * `Ok((matrix, mappings))` - Numeric matrix and the encodings of its categorical columns
/// * `Err(AnalysisError::MalformedInput)` - If an `index` or `drop` column does not exist
pub fn preprocess(
    dataset: &Dataset,
    options: &PreprocessOptions,
) -> Result<(FeatureMatrix, Mappings), AnalysisError> {
    let index = resolve_index(dataset, options)?;
    let ids = row_ids(dataset, &index);

    let columns: Vec<String> = dataset
        .columns
        .iter()
        .filter(|column| !index.contains(column) && !options.drop.contains(column))
        .cloned()
        .collect();

    let mut features = Array2::from_elem((dataset.len(), columns.len()), MISSING_VALUE);
    let mut mappings = Mappings::new();

    for (col_idx, column) in columns.iter().enumerate() {
        let is_numeric = dataset
            .data
            .iter()
            .filter_map(|point| point.get_field(column))
            .all(|cell| parse_numeric(cell).is_some());

        if is_numeric {
            for (row_idx, point) in dataset.data.iter().enumerate() {
                if let Some(value) = point.get_numeric(column) {
                    features[[row_idx, col_idx]] = value;
                }
            }
            continue;
        }

        let categories: BTreeSet<&String> = dataset
            .data
            .iter()
            .filter_map(|point| point.get_field(column))
            .collect();
        let mapping: BTreeMap<String, usize> = categories
            .into_iter()
            .enumerate()
            .map(|(code, category)| (category.clone(), code))
            .collect();

        for (row_idx, point) in dataset.data.iter().enumerate() {
            if let Some(code) = point.get_field(column).and_then(|cell| mapping.get(cell)) {
                features[[row_idx, col_idx]] = *code as f64;
            }
        }
        mappings.insert(column.clone(), mapping);
    }

    debug!(
        "[Preprocess] '{}': {} rows x {} features, {} categorical columns",
        dataset.name,
        dataset.len(),
        columns.len(),
        mappings.len()
    );

    Ok((
        FeatureMatrix {
            ids,
            index_name: index_name(&index),
            columns,
            features,
        },
        mappings,
    ))
}

/// Encode `dataset` into the layout of an earlier [`preprocess`] run
///
/// Features are selected by name in the order of `columns`, and categorical
/// columns use the codes in `mappings`. A category absent from its mapping
/// is encoded like a missing cell.
///
/// # Returns
/// * `Ok(FeatureMatrix)` - Matrix whose columns are exactly `columns`
/// * `Err(AnalysisError::MalformedInput)` - If a column is missing, or a numeric
///   column holds a non-numeric value
pub fn preprocess_with(
    dataset: &Dataset,
    options: &PreprocessOptions,
    columns: &[String],
    mappings: &Mappings,
) -> Result<FeatureMatrix, AnalysisError> {
    let index = resolve_index(dataset, options)?;
    if let Some(column) = columns.iter().find(|column| !dataset.has_column(column)) {
        return Err(AnalysisError::MalformedInput(format!(
            "column `{}` used by the model is missing",
            column
        )));
    }

    let mut features = Array2::from_elem((dataset.len(), columns.len()), MISSING_VALUE);
    for (col_idx, column) in columns.iter().enumerate() {
        let mapping = mappings.get(column);
        for (row_idx, point) in dataset.data.iter().enumerate() {
            let Some(cell) = point.get_field(column) else {
                continue;
            };
            match mapping {
                Some(mapping) => {
                    if let Some(code) = mapping.get(cell) {
                        features[[row_idx, col_idx]] = *code as f64;
                    }
                }
                None => {
                    features[[row_idx, col_idx]] = parse_numeric(cell).ok_or_else(|| {
                        AnalysisError::MalformedInput(format!(
                            "column `{}` is numeric in the model, got `{}`",
                            column, cell
                        ))
                    })?;
                }
            }
        }
    }

    Ok(FeatureMatrix {
        ids: row_ids(dataset, &index),
        index_name: index_name(&index),
        columns: columns.to_vec(),
        features,
    })
}

/// Validate `index` and `drop`, falling back to the dataset's own index
fn resolve_index(
    dataset: &Dataset,
    options: &PreprocessOptions,
) -> Result<Vec<String>, AnalysisError> {
    for column in options.index.iter().chain(options.drop.iter()) {
        if !dataset.has_column(column) {
            return Err(AnalysisError::MalformedInput(format!(
                "`index` or `drop` must exist as columns, `{}` does not",
                column
            )));
        }
    }

    if !options.index.is_empty() {
        return Ok(options.index.clone());
    }
    Ok(dataset
        .index
        .iter()
        .filter(|column| dataset.has_column(column))
        .cloned()
        .collect())
}

fn row_ids(dataset: &Dataset, index: &[String]) -> Vec<String> {
    if index.is_empty() {
        return (0..dataset.len()).map(|i| i.to_string()).collect();
    }
    dataset
        .data
        .iter()
        .map(|point| {
            index
                .iter()
                .map(|column| point.get_field(column).map(String::as_str).unwrap_or(""))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect()
}

fn index_name(index: &[String]) -> Option<String> {
    if index.is_empty() {
        None
    } else {
        Some(index.join(","))
    }
}

/// Group rows on the `on` columns and run [`preprocess`] on every large-enough chunk
///
/// Rows missing any grouping value are left out. Groups are returned in key
/// order, and only those with more than `min_records` rows are kept. The
/// grouping columns become the index unless `options.index` names one.
pub fn preprocess_on(
    dataset: &Dataset,
    on: &[String],
    min_records: usize,
    options: &PreprocessOptions,
) -> Result<Vec<GroupMatrix>, AnalysisError> {
    if on.is_empty() {
        return Err(AnalysisError::MalformedInput(
            "`on` must name at least one column".to_string(),
        ));
    }
    if let Some(column) = on.iter().find(|column| !dataset.has_column(column)) {
        return Err(AnalysisError::MalformedInput(format!(
            "`on` must exist as a column, `{}` does not",
            column
        )));
    }

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row_idx, point) in dataset.data.iter().enumerate() {
        let values: Option<Vec<&str>> = on
            .iter()
            .map(|column| point.get_field(column).map(String::as_str))
            .collect();
        if let Some(values) = values {
            groups.entry(values.join(",")).or_default().push(row_idx);
        }
    }

    let options = if options.index.is_empty() {
        PreprocessOptions {
            index: on.to_vec(),
            drop: options.drop.clone(),
        }
    } else {
        options.clone()
    };

    let mut out = Vec::new();
    for (key, rows) in groups {
        if rows.len() <= min_records {
            debug!(
                "[Preprocess] skipping group '{}' with {} rows (min_records={})",
                key,
                rows.len(),
                min_records
            );
            continue;
        }

        let chunk = Dataset {
            name: format!("{}[{}]", dataset.name, key),
            columns: dataset.columns.clone(),
            index: dataset.index.clone(),
            data: rows.iter().map(|&row| dataset.data[row].clone()).collect(),
        };
        let (matrix, mappings) = preprocess(&chunk, &options)?;
        out.push(GroupMatrix {
            key,
            matrix,
            mappings,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn numeric_dataset(rows: usize, cols: usize) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let header: Vec<String> = (0..cols).map(|c| format!("c{}", c)).collect();
        let mut csv_data = header.join(",");
        for _ in 0..rows {
            let row: Vec<String> = (0..cols)
                .map(|_| rng.gen_range(-100_000..100_000).to_string())
                .collect();
            csv_data.push('\n');
            csv_data.push_str(&row.join(","));
        }
        Dataset::from_csv("numeric".to_string(), &csv_data).unwrap()
    }

    fn grouped_dataset() -> Dataset {
        let csv_data = "groups,x,y\na,1,10\nb,2,20\na,3,30\nb,4,40\na,5,50\nc,6,60";
        Dataset::from_csv("grouped".to_string(), csv_data).unwrap()
    }

    #[test]
    fn test_preprocess_doesnt_change_numeric_array() {
        let dataset = numeric_dataset(12, 3);
        let (matrix, mappings) = preprocess(&dataset, &PreprocessOptions::default()).unwrap();

        assert!(mappings.is_empty());
        assert_eq!(matrix.features.dim(), (12, 3));
        assert_eq!(matrix.ids[5], "5");
        assert_eq!(matrix.index_name, None);
        for (row_idx, point) in dataset.data.iter().enumerate() {
            for (col_idx, column) in matrix.columns.iter().enumerate() {
                assert_eq!(Some(matrix.features[[row_idx, col_idx]]), point.get_numeric(column));
            }
        }
    }

    #[test]
    fn test_populated_mapping_given_nonnumeric_array() {
        let csv_data = "p,q\na,b\nb,b\na,a";
        let dataset = Dataset::from_csv("letters".to_string(), csv_data).unwrap();
        let (matrix, mappings) = preprocess(&dataset, &PreprocessOptions::default()).unwrap();

        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings["p"]["a"], 0);
        assert_eq!(mappings["p"]["b"], 1);
        assert_eq!(matrix.features.column(0).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(matrix.features.column(1).to_vec(), vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_cells_are_encoded() {
        let csv_data = "n,s\n1.5,x\n,y\n3,";
        let dataset = Dataset::from_csv("gaps".to_string(), csv_data).unwrap();
        let (matrix, mappings) = preprocess(&dataset, &PreprocessOptions::default()).unwrap();

        assert_eq!(matrix.features.column(0).to_vec(), vec![1.5, MISSING_VALUE, 3.0]);
        assert_eq!(matrix.features.column(1).to_vec(), vec![0.0, 1.0, MISSING_VALUE]);
        assert_eq!(mappings["s"].len(), 2);
    }

    #[test]
    fn test_invalid_column_as_index_is_malformed() {
        let dataset = numeric_dataset(5, 2);
        let options = PreprocessOptions {
            index: vec!["invalid".to_string()],
            drop: vec![],
        };
        assert!(matches!(
            preprocess(&dataset, &options),
            Err(AnalysisError::MalformedInput(_))
        ));

        let options = PreprocessOptions {
            index: vec![],
            drop: vec!["invalid".to_string()],
        };
        assert!(preprocess(&dataset, &options).is_err());
    }

    #[test]
    fn test_valid_column_set_as_index() {
        let csv_data = "host,cpu,os\nalpha,4,linux\nbeta,8,bsd";
        let dataset = Dataset::from_csv("hosts".to_string(), csv_data).unwrap();
        let options = PreprocessOptions {
            index: vec!["host".to_string()],
            drop: vec!["os".to_string()],
        };
        let (matrix, mappings) = preprocess(&dataset, &options).unwrap();

        assert_eq!(matrix.index_name.as_deref(), Some("host"));
        assert_eq!(matrix.ids, vec!["alpha", "beta"]);
        assert_eq!(matrix.columns, vec!["cpu"]);
        assert!(mappings.is_empty());
    }

    #[test]
    fn test_dataset_index_is_default() {
        let csv_data = "name,v\nx,1\ny,2";
        let mut dataset = Dataset::from_csv("named".to_string(), csv_data).unwrap();
        dataset.index = Some("name".to_string());
        let (matrix, _) = preprocess(&dataset, &PreprocessOptions::default()).unwrap();

        assert_eq!(matrix.ids, vec!["x", "y"]);
        assert_eq!(matrix.columns, vec!["v"]);
    }

    #[test]
    fn test_preprocess_with_follows_saved_layout() {
        let trained = Dataset::from_csv("t".to_string(), "a,b,os\n1,10,linux\n2,20,bsd").unwrap();
        let (matrix, mappings) = preprocess(&trained, &PreprocessOptions::default()).unwrap();
        assert_eq!(matrix.columns, vec!["a", "b", "os"]);

        let csv_data = "os,b,a,extra\nbsd,20,2,x\nplan9,30,3,y";
        let reordered = Dataset::from_csv("r".to_string(), csv_data).unwrap();
        let encoded = preprocess_with(
            &reordered,
            &PreprocessOptions::default(),
            &matrix.columns,
            &mappings,
        )
        .unwrap();

        assert_eq!(encoded.columns, matrix.columns);
        assert_eq!(encoded.features.row(0).to_vec(), vec![2.0, 20.0, 0.0]);
        assert_eq!(encoded.features.row(1).to_vec(), vec![3.0, 30.0, MISSING_VALUE]);
    }

    #[test]
    fn test_preprocess_with_missing_column() {
        let dataset = Dataset::from_csv("m".to_string(), "a\n1").unwrap();
        let columns = vec!["a".to_string(), "b".to_string()];
        let result =
            preprocess_with(&dataset, &PreprocessOptions::default(), &columns, &Mappings::new());
        assert!(matches!(result, Err(AnalysisError::MalformedInput(_))));
    }

    #[test]
    fn test_preprocess_with_text_in_numeric_column() {
        let dataset = Dataset::from_csv("m".to_string(), "a\nhello").unwrap();
        let columns = vec!["a".to_string()];
        let result =
            preprocess_with(&dataset, &PreprocessOptions::default(), &columns, &Mappings::new());
        assert!(matches!(result, Err(AnalysisError::MalformedInput(_))));
    }

    #[test]
    fn test_preprocess_on_output_equals_num_groups() {
        let dataset = grouped_dataset();
        let on = vec!["groups".to_string()];
        let chunks = preprocess_on(&dataset, &on, 0, &PreprocessOptions::default()).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].key, "a");
        assert_eq!(chunks[0].matrix.features.dim(), (3, 2));
        assert_eq!(chunks[0].matrix.ids, vec!["a", "a", "a"]);
        assert_eq!(chunks[0].matrix.columns, vec!["x", "y"]);
    }

    #[test]
    fn test_preprocess_on_min_records() {
        let dataset = grouped_dataset();
        let on = vec!["groups".to_string()];
        let chunks = preprocess_on(&dataset, &on, 2, &PreprocessOptions::default()).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].key, "a");
    }

    #[test]
    fn test_preprocess_on_group_must_exist() {
        let dataset = grouped_dataset();
        let on = vec!["bad column".to_string()];
        assert!(matches!(
            preprocess_on(&dataset, &on, 0, &PreprocessOptions::default()),
            Err(AnalysisError::MalformedInput(_))
        ));
    }
}
