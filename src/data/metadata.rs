//! Sample metadata for tensor construction.

use crate::error::{Result, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A variable value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value of a continuous or ordinal variable.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Label used when this value names a tensor axis position.
    ///
    /// Returns `None` for missing values.
    pub fn label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }

    fn parse(raw: &str, var_type: VariableType) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == "NA" || raw == "na" {
            return Variable::Missing;
        }
        match var_type {
            // NaN and infinities carry no position on a numeric axis
            VariableType::Continuous => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Variable::Continuous(v),
                _ => Variable::Missing,
            },
            VariableType::Ordinal => raw
                .parse::<i64>()
                .map(Variable::Ordinal)
                .unwrap_or(Variable::Missing),
            VariableType::Categorical => Variable::Categorical(raw.to_string()),
        }
    }
}

/// Type hint for metadata columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

impl VariableType {
    /// Whether values of this type are numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, VariableType::Continuous | VariableType::Ordinal)
    }
}

/// Sample metadata containing variables for each sample.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Sample IDs in order.
    sample_ids: Vec<String>,
    /// Column names.
    column_names: Vec<String>,
    /// Data stored as sample_id -> column_name -> Variable.
    data: HashMap<String, HashMap<String, Variable>>,
    /// Type of each column.
    column_types: HashMap<String, VariableType>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self {
            sample_ids: Vec::new(),
            column_names: Vec::new(),
            data: HashMap::new(),
            column_types: HashMap::new(),
        }
    }

    /// Build metadata from raw string records.
    ///
    /// Each record is a sample ID followed by one raw value per column.
    /// Columns are inferred as continuous if all values parse as numbers,
    /// otherwise categorical. Empty strings and `NA` are missing.
    pub fn from_records(column_names: Vec<String>, records: Vec<(String, Vec<String>)>) -> Result<Self> {
        if records.is_empty() {
            return Err(TensorError::EmptyData("No samples in metadata".to_string()));
        }

        // Infer column types
        let mut column_types = HashMap::new();
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let all_numeric = records.iter().all(|(_, values)| {
                let Some(v) = values.get(col_idx) else {
                    return true;
                };
                let v = v.trim();
                v.is_empty() || v == "NA" || v == "na" || v.parse::<f64>().is_ok()
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(col_name.clone(), var_type);
        }

        let mut metadata = Self {
            sample_ids: Vec::new(),
            column_names: column_names.clone(),
            data: HashMap::new(),
            column_types,
        };
        for (sample_id, values) in records {
            let mut sample_data = HashMap::new();
            for (col_idx, col_name) in column_names.iter().enumerate() {
                let var = match values.get(col_idx) {
                    Some(raw) => Variable::parse(raw, metadata.column_types[col_name]),
                    None => Variable::Missing,
                };
                sample_data.insert(col_name.clone(), var);
            }
            metadata.push_sample(sample_id, sample_data)?;
        }
        Ok(metadata)
    }

    /// Build metadata from typed columns.
    ///
    /// A column is numeric when every non-missing value is continuous or
    /// ordinal; ordinal-only columns stay ordinal.
    pub fn from_columns(sample_ids: Vec<String>, columns: Vec<(String, Vec<Variable>)>) -> Result<Self> {
        if sample_ids.is_empty() {
            return Err(TensorError::EmptyData("No samples in metadata".to_string()));
        }
        let mut metadata = Self::new();
        for (name, values) in &columns {
            if values.len() != sample_ids.len() {
                return Err(TensorError::DimensionMismatch {
                    expected: sample_ids.len(),
                    actual: values.len(),
                });
            }
            let present = || values.iter().filter(|v| !v.is_missing());
            let var_type = if present().all(|v| matches!(v, Variable::Ordinal(_))) {
                VariableType::Ordinal
            } else if present().all(|v| v.as_numeric().is_some()) {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            metadata.column_names.push(name.clone());
            metadata.column_types.insert(name.clone(), var_type);
        }
        for (row, sample_id) in sample_ids.into_iter().enumerate() {
            let sample_data = columns
                .iter()
                .map(|(name, values)| (name.clone(), values[row].clone()))
                .collect();
            metadata.push_sample(sample_id, sample_data)?;
        }
        Ok(metadata)
    }

    fn push_sample(&mut self, sample_id: String, sample_data: HashMap<String, Variable>) -> Result<()> {
        if self.data.contains_key(&sample_id) {
            return Err(TensorError::SampleMismatch(format!(
                "Sample '{}' appears more than once in metadata",
                sample_id
            )));
        }
        self.sample_ids.push(sample_id.clone());
        self.data.insert(sample_id, sample_data);
        Ok(())
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Get a variable value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(TensorError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Fail unless the column exists.
    pub fn require_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(TensorError::MissingColumn(column.to_string()))
        }
    }

    /// Check if a sample exists.
    pub fn has_sample(&self, sample_id: &str) -> bool {
        self.data.contains_key(sample_id)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}
