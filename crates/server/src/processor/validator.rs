//! Row validation.

use super::parser::Row;
use hopper_core::config::ImportConfig;
use std::collections::BTreeMap;

/// A validated row, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Unique key of the record in the target store.
    pub identifier: String,
    pub fields: BTreeMap<String, String>,
}

/// Business rules applied to each row before it is written.
///
/// Returning `Err` records a row error with the given message; processing
/// continues with the next row.
pub trait RowValidator: Send + Sync {
    fn validate(&self, row: &Row) -> Result<Record, String>;
}

/// Requires a non-empty identifier and a set of non-empty columns.
#[derive(Debug, Clone)]
pub struct ColumnValidator {
    identifier_column: String,
    required_columns: Vec<String>,
}

impl ColumnValidator {
    pub fn new(identifier_column: impl Into<String>, required_columns: Vec<String>) -> Self {
        Self {
            identifier_column: identifier_column.into(),
            required_columns,
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(
            config.identifier_column.clone(),
            config.required_columns.clone(),
        )
    }
}

impl RowValidator for ColumnValidator {
    fn validate(&self, row: &Row) -> Result<Record, String> {
        let identifier = row
            .get(&self.identifier_column)
            .ok_or_else(|| format!("missing value for column '{}'", self.identifier_column))?;

        let missing: Vec<&str> = self
            .required_columns
            .iter()
            .filter(|column| row.get(column).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing value for column(s): {}", missing.join(", ")));
        }

        Ok(Record {
            identifier: identifier.to_string(),
            fields: row
                .values
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.to_lowercase(), value.clone()))
                .collect(),
        })
    }
}
