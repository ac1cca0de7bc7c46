//! Resolved per-dataset descriptors

use serde::{Deserialize, Serialize};

use super::column::{ColumnSpec, ColumnType};
use crate::transform::TransformSpec;

/// Implicit trailing column stamped with the run timestamp on every managed table
pub const LAST_UPDATED: &str = "last_updated";

/// Suffix of the per-run staging table
pub const STAGING_SUFFIX: &str = "__stg";

/// Foreign-key referential action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    #[default]
    NoAction,
    SetNull,
    SetDefault,
}

impl std::str::FromStr for ReferentialAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "CASCADE" => Ok(ReferentialAction::Cascade),
            "RESTRICT" => Ok(ReferentialAction::Restrict),
            "NO ACTION" => Ok(ReferentialAction::NoAction),
            "SET NULL" => Ok(ReferentialAction::SetNull),
            "SET DEFAULT" => Ok(ReferentialAction::SetDefault),
            _ => Err(format!(
                "Unknown referential action: {}. Use CASCADE, RESTRICT, NO ACTION, SET NULL or SET DEFAULT.",
                s
            )),
        }
    }
}

impl TryFrom<String> for ReferentialAction {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ReferentialAction> for String {
    fn from(action: ReferentialAction) -> Self {
        action.to_string()
    }
}

impl std::fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferentialAction::Cascade => write!(f, "CASCADE"),
            ReferentialAction::Restrict => write!(f, "RESTRICT"),
            ReferentialAction::NoAction => write!(f, "NO ACTION"),
            ReferentialAction::SetNull => write!(f, "SET NULL"),
            ReferentialAction::SetDefault => write!(f, "SET DEFAULT"),
        }
    }
}

/// Foreign key from a dataset's columns to another configured table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns in this dataset
    pub columns: Vec<String>,
    /// Referenced table name
    pub ref_table: String,
    /// Referenced columns, same arity as `columns`
    pub ref_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

/// Everything the pipeline needs to know about one dataset
///
/// Built by [`EtlConfig`](crate::config::EtlConfig) after validation, so column
/// references in keys and constraints are known to exist.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Dataset name (configuration key)
    pub name: String,
    /// CSV file name relative to the data root
    pub file: String,
    /// Target table
    pub table: String,
    /// Declared columns in declaration order, without `last_updated`
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    /// Columns identifying a row for upsert and prune
    pub key_columns: Vec<String>,
    pub unique_constraints: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
    pub transform: TransformSpec,
    /// CSV field values read as NULL
    pub null_values: Vec<String>,
}

impl DatasetSpec {
    /// Look up a declared column
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Declared column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Physical table columns: declared columns followed by `last_updated`
    pub fn table_columns(&self) -> Vec<&str> {
        let mut names = self.column_names();
        names.push(LAST_UPDATED);
        names
    }

    /// Physical table column specs, `last_updated` included
    pub fn table_column_specs(&self) -> Vec<ColumnSpec> {
        let mut specs = self.columns.clone();
        specs.push(ColumnSpec::new(LAST_UPDATED, ColumnType::DateTime));
        specs
    }

    /// Declared columns outside the key; these are compared during upsert
    pub fn non_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !self.key_columns.iter().any(|k| k == name))
            .collect()
    }

    /// Name of the per-run staging table
    pub fn staging_table(&self) -> String {
        format!("{}{}", self.table, STAGING_SUFFIX)
    }

    /// Tables this dataset references, excluding itself
    pub fn parent_tables(&self) -> Vec<&str> {
        let mut parents: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            if fk.ref_table != self.table && !parents.contains(&fk.ref_table.as_str()) {
                parents.push(&fk.ref_table);
            }
        }
        parents
    }
}
