//! Configuration validation
//!
//! Provides validation logic for:
//! - SQL identifiers (table, column and schema names)
//! - Dataset structure (keys, constraints, foreign keys, transform descriptors)
//! - Foreign-key load order (explicit sequence or derived dependency order)

pub mod identifiers;
pub mod load_order;

use std::collections::{HashMap, HashSet};

use thiserror::Error;

pub use identifiers::{
    MAX_IDENTIFIER_LENGTH, MAX_TABLE_NAME_LENGTH, is_valid_identifier, validate_column_name,
    validate_schema_name, validate_table_name,
};
pub use load_order::{check_load_sequence, dependency_order};

use crate::models::{ColumnType, DatasetSpec};

/// Errors found while validating a configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Identifier is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Identifier contains characters outside `[A-Za-z0-9_]` or starts with a digit
    #[error("{field} '{name}' must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidIdentifier { field: &'static str, name: String },

    /// Identifier exceeds the maximum length
    #[error("{field} '{name}' exceeds maximum length {max}")]
    TooLong {
        field: &'static str,
        name: String,
        max: usize,
    },

    #[error("Dataset '{dataset}' declares no columns")]
    NoColumns { dataset: String },

    /// Neither a primary key nor key columns are configured
    #[error("Dataset '{dataset}' has neither primary_key nor key_columns")]
    NoKey { dataset: String },

    /// Table is targeted by more than one dataset
    #[error("Table '{0}' is used by more than one dataset")]
    DuplicateTable(String),

    /// A key, constraint or transform refers to an undeclared column
    #[error("Dataset '{dataset}': {context} refers to undeclared column '{column}'")]
    UnknownColumn {
        dataset: String,
        column: String,
        context: String,
    },

    #[error("Dataset '{dataset}': invalid key: {message}")]
    InvalidKey { dataset: String, message: String },

    #[error("Dataset '{dataset}': invalid foreign key: {message}")]
    InvalidForeignKey { dataset: String, message: String },

    #[error("Dataset '{dataset}': invalid transform: {message}")]
    InvalidTransform { dataset: String, message: String },

    #[error("Invalid load sequence: {0}")]
    LoadSequence(String),

    /// Foreign keys form a cycle between these datasets
    #[error("Circular foreign-key dependency between datasets: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

fn same_columns(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

fn require_declared(
    dataset: &DatasetSpec,
    columns: &[String],
    context: &str,
) -> ValidationResult<()> {
    match columns.iter().find(|c| !dataset.has_column(c)) {
        Some(column) => Err(ValidationError::UnknownColumn {
            dataset: dataset.name.clone(),
            column: column.clone(),
            context: context.to_string(),
        }),
        None => Ok(()),
    }
}

/// Check whether `columns` is the primary key or one of the unique constraints
fn is_unique_key(dataset: &DatasetSpec, columns: &[String]) -> bool {
    (!dataset.primary_key.is_empty() && same_columns(columns, &dataset.primary_key))
        || dataset
            .unique_constraints
            .iter()
            .any(|u| same_columns(columns, u))
}

/// Validate every dataset on its own and against the others
pub fn validate_datasets(datasets: &[DatasetSpec]) -> ValidationResult<()> {
    let mut tables: HashMap<&str, &DatasetSpec> = HashMap::new();
    for dataset in datasets {
        validate_table_name(&dataset.table)?;
        if tables.insert(dataset.table.as_str(), dataset).is_some() {
            return Err(ValidationError::DuplicateTable(dataset.table.clone()));
        }
    }

    for dataset in datasets {
        validate_dataset(dataset)?;
        validate_foreign_keys(dataset, &tables)?;
        validate_transform(dataset)?;
    }
    Ok(())
}

fn validate_dataset(dataset: &DatasetSpec) -> ValidationResult<()> {
    if dataset.columns.is_empty() {
        return Err(ValidationError::NoColumns {
            dataset: dataset.name.clone(),
        });
    }
    for column in &dataset.columns {
        validate_column_name(&column.name)?;
    }

    if dataset.key_columns.is_empty() {
        return Err(ValidationError::NoKey {
            dataset: dataset.name.clone(),
        });
    }
    require_declared(dataset, &dataset.primary_key, "primary_key")?;

    for unique in &dataset.unique_constraints {
        if unique.is_empty() {
            return Err(ValidationError::InvalidKey {
                dataset: dataset.name.clone(),
                message: "unique constraint has no columns".to_string(),
            });
        }
        require_declared(dataset, unique, "unique_constraints")?;
    }

    require_declared(dataset, &dataset.key_columns, "key_columns")?;
    if !is_unique_key(dataset, &dataset.key_columns) {
        return Err(ValidationError::InvalidKey {
            dataset: dataset.name.clone(),
            message: format!(
                "key_columns [{}] must equal the primary key or a unique constraint",
                dataset.key_columns.join(", ")
            ),
        });
    }
    Ok(())
}

fn validate_foreign_keys(
    dataset: &DatasetSpec,
    tables: &HashMap<&str, &DatasetSpec>,
) -> ValidationResult<()> {
    for fk in &dataset.foreign_keys {
        let invalid = |message: String| ValidationError::InvalidForeignKey {
            dataset: dataset.name.clone(),
            message,
        };

        if fk.columns.is_empty() {
            return Err(invalid("no columns".to_string()));
        }
        if fk.columns.len() != fk.ref_columns.len() {
            return Err(invalid(format!(
                "{} columns reference {} columns of '{}'",
                fk.columns.len(),
                fk.ref_columns.len(),
                fk.ref_table
            )));
        }
        require_declared(dataset, &fk.columns, "foreign key")?;

        let parent = tables.get(fk.ref_table.as_str()).ok_or_else(|| {
            invalid(format!("'{}' is not a configured table", fk.ref_table))
        })?;
        require_declared(parent, &fk.ref_columns, "referenced columns")?;
        if !is_unique_key(parent, &fk.ref_columns) {
            return Err(invalid(format!(
                "referenced columns [{}] are not a primary key or unique constraint of '{}'",
                fk.ref_columns.join(", "),
                fk.ref_table
            )));
        }
    }
    Ok(())
}

fn validate_transform(dataset: &DatasetSpec) -> ValidationResult<()> {
    let transform = &dataset.transform;
    let invalid = |message: String| ValidationError::InvalidTransform {
        dataset: dataset.name.clone(),
        message,
    };

    for column in transform.date_formats.keys() {
        match dataset.column(column).map(|c| c.ty) {
            Some(ColumnType::Date) | Some(ColumnType::DateTime) => {}
            Some(other) => {
                return Err(invalid(format!(
                    "date format given for '{}' of type {}",
                    column, other
                )));
            }
            None => {
                return Err(ValidationError::UnknownColumn {
                    dataset: dataset.name.clone(),
                    column: column.clone(),
                    context: "date_formats".to_string(),
                });
            }
        }
    }
    require_declared(dataset, &transform.lenient, "lenient")?;

    if let Some(rule) = &transform.line_number {
        require_declared(dataset, std::slice::from_ref(&rule.column), "line_number")?;
        require_declared(dataset, &rule.partition_by, "line_number.partition_by")?;
        require_declared(dataset, &rule.order_by, "line_number.order_by")?;
        if dataset.column(&rule.column).map(|c| c.ty) != Some(ColumnType::Integer) {
            return Err(invalid(format!(
                "line number column '{}' must be Integer",
                rule.column
            )));
        }
    }

    if let Some(rule) = &transform.aggregate {
        if rule.group_by.is_empty() {
            return Err(invalid("aggregate.group_by is empty".to_string()));
        }
        require_declared(dataset, &rule.group_by, "aggregate.group_by")?;
        require_declared(dataset, &rule.sum, "aggregate.sum")?;
        for column in &rule.sum {
            if dataset.column(column).and_then(|c| c.ty.zero()).is_none() {
                return Err(invalid(format!("cannot sum non-numeric column '{}'", column)));
            }
        }
        let kept: Vec<&str> = dataset
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| !rule.group_by.iter().any(|g| g == n) && !rule.sum.iter().any(|s| s == n))
            .collect();
        if !kept.is_empty() {
            return Err(invalid(format!(
                "aggregation drops declared columns: {}",
                kept.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSpec, ForeignKey, ReferentialAction};
    use crate::transform::{AggregateRule, TransformSpec};

    fn dataset(name: &str, columns: &[(&str, ColumnType)], pk: &[&str]) -> DatasetSpec {
        let pk: Vec<String> = pk.iter().map(|s| s.to_string()).collect();
        DatasetSpec {
            name: name.to_string(),
            file: format!("{}.csv", name),
            table: name.to_string(),
            columns: columns
                .iter()
                .map(|(n, t)| ColumnSpec::new(*n, *t))
                .collect(),
            primary_key: pk.clone(),
            key_columns: pk,
            unique_constraints: vec![],
            foreign_keys: vec![],
            transform: TransformSpec::default(),
            null_values: vec![],
        }
    }

    fn fk(columns: &[&str], table: &str, ref_columns: &[&str]) -> ForeignKey {
        ForeignKey {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            ref_table: table.to_string(),
            ref_columns: ref_columns.iter().map(|s| s.to_string()).collect(),
            on_delete: ReferentialAction::Restrict,
            on_update: ReferentialAction::NoAction,
        }
    }

    #[test]
    fn test_valid_pair() {
        let brands = dataset("brands", &[("brand_id", ColumnType::Integer)], &["brand_id"]);
        let mut products = dataset(
            "products",
            &[
                ("product_id", ColumnType::Integer),
                ("brand_id", ColumnType::Integer),
            ],
            &["product_id"],
        );
        products.foreign_keys.push(fk(&["brand_id"], "brands", &["brand_id"]));
        assert!(validate_datasets(&[brands, products]).is_ok());
    }

    #[test]
    fn test_undeclared_primary_key() {
        let ds = dataset("brands", &[("brand_id", ColumnType::Integer)], &["id"]);
        assert!(matches!(
            validate_datasets(&[ds]),
            Err(ValidationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_key_columns_must_be_unique_key() {
        let mut ds = dataset(
            "stores",
            &[
                ("store_id", ColumnType::Integer),
                ("store_name", ColumnType::String { length: 50 }),
            ],
            &["store_id"],
        );
        ds.key_columns = vec!["store_name".to_string()];
        assert!(matches!(
            validate_datasets(std::slice::from_ref(&ds)),
            Err(ValidationError::InvalidKey { .. })
        ));

        ds.unique_constraints.push(vec!["store_name".to_string()]);
        assert!(validate_datasets(&[ds]).is_ok());
    }

    #[test]
    fn test_foreign_key_arity_and_target() {
        let brands = dataset("brands", &[("brand_id", ColumnType::Integer)], &["brand_id"]);
        let mut products = dataset(
            "products",
            &[
                ("product_id", ColumnType::Integer),
                ("brand_id", ColumnType::Integer),
            ],
            &["product_id"],
        );
        products
            .foreign_keys
            .push(fk(&["brand_id", "product_id"], "brands", &["brand_id"]));
        assert!(matches!(
            validate_datasets(&[brands.clone(), products.clone()]),
            Err(ValidationError::InvalidForeignKey { .. })
        ));

        products.foreign_keys = vec![fk(&["brand_id"], "vendors", &["vendor_id"])];
        assert!(matches!(
            validate_datasets(&[brands, products]),
            Err(ValidationError::InvalidForeignKey { .. })
        ));
    }

    #[test]
    fn test_unique_constraint_as_key_without_primary_key() {
        let mut staffs = dataset(
            "staffs",
            &[
                ("staff_first_name", ColumnType::String { length: 50 }),
                ("email", ColumnType::String { length: 50 }),
            ],
            &[],
        );
        assert!(matches!(
            validate_datasets(std::slice::from_ref(&staffs)),
            Err(ValidationError::NoKey { .. })
        ));

        let key = vec!["staff_first_name".to_string(), "email".to_string()];
        staffs.unique_constraints.push(key.clone());
        staffs.key_columns = key;
        assert!(validate_datasets(&[staffs]).is_ok());
    }

    #[test]
    fn test_duplicate_table() {
        let a = dataset("a", &[("id", ColumnType::Integer)], &["id"]);
        let mut b = dataset("b", &[("id", ColumnType::Integer)], &["id"]);
        b.table = "a".to_string();
        assert_eq!(
            validate_datasets(&[a, b]),
            Err(ValidationError::DuplicateTable("a".to_string()))
        );
    }

    #[test]
    fn test_aggregate_must_cover_declared_columns() {
        let mut stocks = dataset(
            "stocks",
            &[
                ("store_name", ColumnType::String { length: 50 }),
                ("product_id", ColumnType::Integer),
                ("quantity", ColumnType::Integer),
                ("note", ColumnType::String { length: 10 }),
            ],
            &["store_name", "product_id"],
        );
        stocks.transform.aggregate = Some(AggregateRule {
            group_by: vec!["store_name".to_string(), "product_id".to_string()],
            sum: vec!["quantity".to_string()],
        });
        assert!(matches!(
            validate_datasets(std::slice::from_ref(&stocks)),
            Err(ValidationError::InvalidTransform { .. })
        ));

        stocks.columns.pop();
        assert!(validate_datasets(&[stocks]).is_ok());
    }

    #[test]
    fn test_date_format_on_non_date_column() {
        let mut ds = dataset("orders", &[("order_id", ColumnType::Integer)], &["order_id"]);
        ds.transform
            .date_formats
            .insert("order_id".to_string(), "%d/%m/%Y".to_string());
        assert!(matches!(
            validate_datasets(&[ds]),
            Err(ValidationError::InvalidTransform { .. })
        ));
    }
}
