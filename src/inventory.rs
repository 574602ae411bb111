//! Host-inventory responses pivoted into a [`Dataset`].
//!
//! Each host (`display_name`) becomes one row and each system fact one
//! column. Retrieving the response is the caller's business; this module only
//! reshapes an already-fetched JSON document.

use log::debug;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::dataset::{DataPoint, Dataset};
use crate::utils::{format_float, AnalysisError};

/// Column holding the host name; it is the dataset's index
pub const INDEX_COLUMN: &str = "display_name";

/// Cell value for facts that are null or of an unsupported type
const UNKNOWN_FACT: &str = "-1";

/// Pivot a host-inventory response into a dataset indexed by [`INDEX_COLUMN`]
///
/// Fact values are flattened as follows: numbers and booleans become floats,
/// every item of a list becomes its own `key|item` column set to `true`,
/// strings are kept, nested objects contribute one column per inner key, and
/// anything else is recorded as `-1`. Hosts without facts are kept as rows with
/// only missing cells.
///
/// # Returns
/// * `Ok(Dataset)` - Rows and columns both in sorted order
/// * `Err(AnalysisError::MalformedInput)` - Missing `results`, `facts`, `account`
///   or `display_name` keys, non-object fact entries, or one host reporting two
///   different values for the same column
pub fn inventory_to_dataset(response: &Value) -> Result<Dataset, AnalysisError> {
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("JSON must contain a `results` array"))?;

    let mut hosts: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut lacks_data = Vec::new();

    for result in results {
        let facts = result
            .get("facts")
            .ok_or_else(|| malformed("JSON must contain `facts` key under `results`"))?;
        if result.get("account").is_none() {
            return Err(malformed("JSON must contain `account` key under `results`"));
        }
        let name = result
            .get("display_name")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("JSON must contain `display_name` key under `results`"))?
            .to_string();

        let entries = facts
            .as_array()
            .ok_or_else(|| malformed("`facts` must be a list"))?;
        if entries.is_empty() {
            lacks_data.push(name);
            continue;
        }

        let row = hosts.entry(name.clone()).or_default();
        for entry in entries {
            let entry = entry
                .as_object()
                .ok_or_else(|| malformed("Data elements must be dict"))?;
            let namespace_facts = entry
                .get("facts")
                .ok_or_else(|| malformed("`facts` key must reside in the dictionary"))?
                .as_object()
                .ok_or_else(|| malformed("inner `facts` must be a dictionary"))?;

            for (key, value) in namespace_facts {
                for (column, cell) in flatten_fact(key, value) {
                    insert_cell(row, &name, column, cell)?;
                }
            }
        }
    }

    for name in lacks_data {
        hosts.entry(name).or_default();
    }

    let columns: BTreeSet<String> = hosts.values().flat_map(|row| row.keys().cloned()).collect();

    let mut dataset = Dataset::new("inventory".to_string());
    dataset.columns.push(INDEX_COLUMN.to_string());
    dataset.columns.extend(columns);
    dataset.index = Some(INDEX_COLUMN.to_string());

    for (name, row) in hosts {
        let mut point = DataPoint::new();
        point.add_field(INDEX_COLUMN.to_string(), name);
        for (column, cell) in row {
            point.add_field(column, cell);
        }
        dataset.add_point(point);
    }

    debug!(
        "[Inventory] pivoted {} hosts x {} facts",
        dataset.len(),
        dataset.columns.len() - 1
    );
    Ok(dataset)
}

fn flatten_fact(key: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Bool(b) => vec![(key.to_string(), format_float(if *b { 1.0 } else { 0.0 }))],
        Value::Number(n) => match n.as_f64() {
            Some(v) => vec![(key.to_string(), format_float(v))],
            None => vec![(key.to_string(), UNKNOWN_FACT.to_string())],
        },
        Value::Array(items) => items
            .iter()
            .map(|item| (format!("{}|{}", key, cell_text(item)), "true".to_string()))
            .collect(),
        Value::String(s) => vec![(key.to_string(), s.clone())],
        Value::Object(inner) => inner
            .iter()
            .map(|(inner_key, inner_value)| (inner_key.clone(), cell_text(inner_value)))
            .collect(),
        Value::Null => vec![(key.to_string(), UNKNOWN_FACT.to_string())],
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => UNKNOWN_FACT.to_string(),
        other => other.to_string(),
    }
}

fn insert_cell(
    row: &mut BTreeMap<String, String>,
    host: &str,
    column: String,
    cell: String,
) -> Result<(), AnalysisError> {
    match row.get(&column) {
        Some(existing) if *existing != cell => Err(malformed(&format!(
            "host `{}` reports conflicting values for `{}`",
            host, column
        ))),
        Some(_) => Ok(()),
        None => {
            row.insert(column, cell);
            Ok(())
        }
    }
}

fn malformed(msg: &str) -> AnalysisError {
    AnalysisError::MalformedInput(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{preprocess, PreprocessOptions};
    use serde_json::json;

    fn sample_response() -> Value {
        json!({
            "results": [
                {
                    "account": "1",
                    "display_name": "web-1",
                    "facts": [{
                        "namespace": "inventory",
                        "facts": {
                            "cores": 4,
                            "virtual": true,
                            "os": "rhel",
                            "tags": ["prod", "web"],
                            "memory": {"ram_gb": 16},
                            "vendor": null
                        }
                    }]
                },
                {
                    "account": "1",
                    "display_name": "db-1",
                    "facts": [{"namespace": "inventory", "facts": {"cores": 16, "os": "rhel"}}]
                },
                {
                    "account": "2",
                    "display_name": "empty-1",
                    "facts": []
                }
            ]
        })
    }

    #[test]
    fn test_inventory_pivot() {
        let dataset = inventory_to_dataset(&sample_response()).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.index.as_deref(), Some(INDEX_COLUMN));
        assert_eq!(
            dataset.columns,
            vec![
                INDEX_COLUMN,
                "cores",
                "os",
                "ram_gb",
                "tags|prod",
                "tags|web",
                "vendor",
                "virtual",
            ]
        );

        // rows are sorted by host name
        let web = &dataset.data[2];
        assert_eq!(web.get_field(INDEX_COLUMN).map(String::as_str), Some("web-1"));
        assert_eq!(web.get_numeric("cores"), Some(4.0));
        assert_eq!(web.get_numeric("virtual"), Some(1.0));
        assert_eq!(web.get_field("tags|web").map(String::as_str), Some("true"));
        assert_eq!(web.get_field("ram_gb").map(String::as_str), Some("16"));
        assert_eq!(web.get_numeric("vendor"), Some(-1.0));

        let empty = &dataset.data[1];
        assert_eq!(empty.get_field(INDEX_COLUMN).map(String::as_str), Some("empty-1"));
        assert_eq!(empty.fields.len(), 1);
    }

    #[test]
    fn test_inventory_feeds_preprocess() {
        let dataset = inventory_to_dataset(&sample_response()).unwrap();
        let (matrix, mappings) = preprocess(&dataset, &PreprocessOptions::default()).unwrap();

        assert_eq!(matrix.ids, vec!["db-1", "empty-1", "web-1"]);
        assert_eq!(matrix.features.nrows(), 3);
        assert!(!matrix.columns.contains(&INDEX_COLUMN.to_string()));
        assert!(mappings.contains_key("os"));
    }

    #[test]
    fn test_missing_keys_are_malformed() {
        let no_facts = json!({"results": [{"account": "1", "display_name": "a"}]});
        assert!(matches!(
            inventory_to_dataset(&no_facts),
            Err(AnalysisError::MalformedInput(_))
        ));

        let no_account = json!({"results": [{"facts": [], "display_name": "a"}]});
        assert!(inventory_to_dataset(&no_account).is_err());

        let bad_entry = json!({"results": [{"account": "1", "display_name": "a", "facts": [3]}]});
        assert!(inventory_to_dataset(&bad_entry).is_err());

        let no_inner = json!({
            "results": [{"account": "1", "display_name": "a", "facts": [{"namespace": "x"}]}]
        });
        assert!(inventory_to_dataset(&no_inner).is_err());

        assert!(inventory_to_dataset(&json!({"count": 0})).is_err());
    }

    #[test]
    fn test_conflicting_values_are_rejected() {
        let response = json!({
            "results": [{
                "account": "1",
                "display_name": "a",
                "facts": [
                    {"facts": {"cores": 2}},
                    {"facts": {"cores": 4}}
                ]
            }]
        });
        assert!(inventory_to_dataset(&response).is_err());
    }
}
