use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents a single record with named fields; absent keys are missing cells
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub fields: HashMap<String, String>,
}

impl DataPoint {
    /// Create a new data point
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Add a field to the data point
    pub fn add_field(&mut self, key: String, value: String) {
        self.fields.insert(key, value);
    }

    /// Get a field value
    pub fn get_field(&self, key: &str) -> Option<&String> {
        self.fields.get(key)
    }

    /// Parse a numeric field value
    pub fn get_numeric(&self, key: &str) -> Option<f64> {
        crate::utils::parse_numeric(self.get_field(key)?)
    }
}

impl Default for DataPoint {
    fn default() -> Self {
        Self::new()
    }
}

/// A table of records with an ordered column list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Column names in table order
    pub columns: Vec<String>,
    /// Column identifying each row when no explicit index is requested
    pub index: Option<String>,
    pub data: Vec<DataPoint>,
}

impl Dataset {
    /// Create a new empty dataset
    pub fn new(name: String) -> Self {
        Self {
            name,
            columns: Vec::new(),
            index: None,
            data: Vec::new(),
        }
    }

    /// Add a data point, registering any columns not seen before
    pub fn add_point(&mut self, point: DataPoint) {
        let mut unseen: Vec<&String> = point
            .fields
            .keys()
            .filter(|key| !self.columns.contains(key))
            .collect();
        unseen.sort();
        self.columns.extend(unseen.into_iter().cloned());
        self.data.push(point);
    }

    /// Get the number of data points
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get all field names, sorted
    pub fn get_field_names(&self) -> Vec<String> {
        let mut result = self.columns.clone();
        result.sort();
        result
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Load dataset from CSV; empty cells are treated as missing
    pub fn from_csv(name: String, csv_data: &str) -> crate::Result<Self> {
        let mut dataset = Dataset::new(name);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv_data.as_bytes());

        let headers = reader.headers()?.clone();
        dataset.columns = headers.iter().map(str::to_string).collect();

        for result in reader.records() {
            let record = result?;
            let mut point = DataPoint::new();

            for (i, field) in record.iter().enumerate() {
                if field.is_empty() {
                    continue;
                }
                if let Some(header) = headers.get(i) {
                    point.add_field(header.to_string(), field.to_string());
                }
            }
            dataset.add_point(point);
        }

        Ok(dataset)
    }

    /// Load dataset from JSON array; nulls are treated as missing
    pub fn from_json(name: String, json_data: &str) -> crate::Result<Self> {
        let mut dataset = Dataset::new(name);
        let data: Vec<HashMap<String, serde_json::Value>> = serde_json::from_str(json_data)?;

        for item in data {
            let mut point = DataPoint::new();
            for (key, value) in item {
                let value_str = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null => continue,
                    _ => value.to_string(),
                };
                point.add_field(key, value_str);
            }
            dataset.add_point(point);
        }

        Ok(dataset)
    }
}
