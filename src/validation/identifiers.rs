//! SQL identifier validation
//!
//! Table and column names are interpolated into generated SQL (quoted), so they are
//! restricted to a conservative character set and to PostgreSQL's identifier length.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ValidationError, ValidationResult};
use crate::models::STAGING_SUFFIX;

/// PostgreSQL truncates identifiers longer than this
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Table names leave room for the staging suffix
pub const MAX_TABLE_NAME_LENGTH: usize = MAX_IDENTIFIER_LENGTH - STAGING_SUFFIX.len();

static RE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"));

/// Check an identifier against the allowed pattern, ignoring length
pub fn is_valid_identifier(name: &str) -> bool {
    RE_IDENTIFIER.is_match(name)
}

fn validate(name: &str, field: &'static str, max: usize) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if !is_valid_identifier(name) {
        return Err(ValidationError::InvalidIdentifier {
            field,
            name: name.to_string(),
        });
    }
    if name.len() > max {
        return Err(ValidationError::TooLong {
            field,
            name: name.to_string(),
            max,
        });
    }
    Ok(())
}

/// Validate a target table name
///
/// ```
/// use retail_etl::validation::validate_table_name;
///
/// assert!(validate_table_name("order_items").is_ok());
/// assert!(validate_table_name("1orders").is_err());
/// assert!(validate_table_name("orders; DROP TABLE x").is_err());
/// ```
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    validate(name, "table name", MAX_TABLE_NAME_LENGTH)
}

/// Validate a column name
pub fn validate_column_name(name: &str) -> ValidationResult<()> {
    validate(name, "column name", MAX_IDENTIFIER_LENGTH)
}

/// Validate a schema name
pub fn validate_schema_name(name: &str) -> ValidationResult<()> {
    validate(name, "schema name", MAX_IDENTIFIER_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["brands", "_tmp", "order_items2", "Staff"] {
            assert!(is_valid_identifier(name), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in ["", "2fast", "with space", "quote\"d", "semi;colon", "dash-ed"] {
            assert!(!is_valid_identifier(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_table_name_leaves_room_for_staging_suffix() {
        let ok = "t".repeat(MAX_TABLE_NAME_LENGTH);
        assert!(validate_table_name(&ok).is_ok());

        let too_long = "t".repeat(MAX_TABLE_NAME_LENGTH + 1);
        assert!(matches!(
            validate_table_name(&too_long),
            Err(ValidationError::TooLong { .. })
        ));
        assert!(validate_column_name(&too_long).is_ok());
    }

    #[test]
    fn test_empty_name() {
        assert!(matches!(
            validate_column_name(""),
            Err(ValidationError::Empty("column name"))
        ));
    }
}
