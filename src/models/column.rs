//! Column types declared per dataset and their CSV/SQL conversions

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::Value;

/// Date-time layouts tried in order when a column has no explicit format
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Default date layout
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column type as written in the configuration file
///
/// Accepts either a bare name (`Integer`) or a map (`{type: String, length: 50}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TypeSpec {
    /// Bare type name
    Name(String),
    /// Type name with parameters
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        length: Option<u32>,
    },
}

/// Semantic column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Bounded string, `VARCHAR(length)`
    String { length: u32 },
    /// 64-bit integer, `BIGINT`
    Integer,
    /// Double precision float
    Float,
    Boolean,
    Date,
    /// Timezone-naive timestamp
    DateTime,
}

impl ColumnType {
    /// Resolve a configured type spec, using `default_varchar_len` for unsized strings
    pub fn from_spec(spec: &TypeSpec, default_varchar_len: u32) -> Result<Self, String> {
        let (kind, length) = match spec {
            TypeSpec::Name(name) => (name.as_str(), None),
            TypeSpec::Detailed { kind, length } => (kind.as_str(), *length),
        };

        match kind.to_lowercase().as_str() {
            "string" | "varchar" | "text" => {
                let length = length.unwrap_or(default_varchar_len);
                if length == 0 {
                    return Err("String length must be greater than zero".to_string());
                }
                Ok(ColumnType::String { length })
            }
            "integer" | "int" | "bigint" => Ok(ColumnType::Integer),
            "float" | "double" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "timestamp" => Ok(ColumnType::DateTime),
            other => Err(format!("Unsupported type name: {}", other)),
        }
    }

    /// SQL type used in DDL
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::String { length } => format!("VARCHAR({})", length),
            ColumnType::Integer => "BIGINT".to_string(),
            ColumnType::Float => "DOUBLE PRECISION".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
        }
    }

    /// Parse one raw CSV field
    ///
    /// `format` is a chrono format string, used by date and date-time columns only.
    /// The error is a human-readable reason.
    pub fn parse_value(&self, raw: &str, format: Option<&str>) -> Result<Value, String> {
        match self {
            ColumnType::String { length } => {
                let chars = raw.chars().count();
                if chars > *length as usize {
                    Err(format!("{} characters exceeds length {}", chars, length))
                } else {
                    Ok(Value::Text(raw.to_string()))
                }
            }
            ColumnType::Integer => parse_integer(raw.trim()).map(Value::Integer),
            ColumnType::Float => raw
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string()),
            ColumnType::Boolean => parse_boolean(raw.trim()).map(Value::Boolean),
            ColumnType::Date => {
                let fmt = format.unwrap_or(DATE_FORMAT);
                NaiveDate::parse_from_str(raw.trim(), fmt)
                    .map(Value::Date)
                    .map_err(|e| format!("{} (expected {})", e, fmt))
            }
            ColumnType::DateTime => parse_datetime(raw.trim(), format).map(Value::Timestamp),
        }
    }

    /// Zero value for summing, when the type is numeric
    pub fn zero(&self) -> Option<Value> {
        match self {
            ColumnType::Integer => Some(Value::Integer(0)),
            ColumnType::Float => Some(Value::Float(0.0)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::String { length } => write!(f, "String({})", length),
            ColumnType::Integer => write!(f, "Integer"),
            ColumnType::Float => write!(f, "Float"),
            ColumnType::Boolean => write!(f, "Boolean"),
            ColumnType::Date => write!(f, "Date"),
            ColumnType::DateTime => write!(f, "DateTime"),
        }
    }
}

fn parse_integer(raw: &str) -> Result<i64, String> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(i);
    }
    // Integral floats such as "3.0" come out of spreadsheet exports.
    match raw.parse::<f64>() {
        Ok(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 9.0e15 => Ok(x as i64),
        _ => Err("invalid integer".to_string()),
    }
}

fn parse_boolean(raw: &str) -> Result<bool, String> {
    match raw.to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err("invalid boolean".to_string()),
    }
}

fn parse_datetime(raw: &str, format: Option<&str>) -> Result<NaiveDateTime, String> {
    if let Some(fmt) = format {
        return NaiveDateTime::parse_from_str(raw, fmt)
            .or_else(|_| NaiveDate::parse_from_str(raw, fmt).map(|d| d.and_time(NaiveTime::MIN)))
            .map_err(|e| format!("{} (expected {})", e, fmt));
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| "unrecognised date-time".to_string())
}

/// A declared column: name plus semantic type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec() {
        let spec = TypeSpec::Name("String".to_string());
        assert_eq!(
            ColumnType::from_spec(&spec, 191).unwrap(),
            ColumnType::String { length: 191 }
        );

        let spec = TypeSpec::Detailed {
            kind: "String".to_string(),
            length: Some(50),
        };
        assert_eq!(
            ColumnType::from_spec(&spec, 191).unwrap(),
            ColumnType::String { length: 50 }
        );

        let spec = TypeSpec::Name("DateTime".to_string());
        assert_eq!(ColumnType::from_spec(&spec, 191).unwrap(), ColumnType::DateTime);

        assert!(ColumnType::from_spec(&TypeSpec::Name("Money".to_string()), 191).is_err());
    }

    #[test]
    fn test_type_spec_yaml_forms() {
        let bare: TypeSpec = serde_yaml::from_str("Integer").unwrap();
        assert_eq!(bare, TypeSpec::Name("Integer".to_string()));

        let detailed: TypeSpec = serde_yaml::from_str("{type: String, length: 20}").unwrap();
        assert_eq!(
            detailed,
            TypeSpec::Detailed {
                kind: "String".to_string(),
                length: Some(20)
            }
        );
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(ColumnType::String { length: 50 }.sql_type(), "VARCHAR(50)");
        assert_eq!(ColumnType::Integer.sql_type(), "BIGINT");
        assert_eq!(ColumnType::Float.sql_type(), "DOUBLE PRECISION");
        assert_eq!(ColumnType::DateTime.sql_type(), "TIMESTAMP");
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(ColumnType::Integer.parse_value("42", None).unwrap(), Value::Integer(42));
        assert_eq!(ColumnType::Integer.parse_value(" 7 ", None).unwrap(), Value::Integer(7));
        assert_eq!(ColumnType::Integer.parse_value("3.0", None).unwrap(), Value::Integer(3));
        assert!(ColumnType::Integer.parse_value("3.5", None).is_err());
        assert!(ColumnType::Integer.parse_value("abc", None).is_err());
    }

    #[test]
    fn test_parse_string_length() {
        let ty = ColumnType::String { length: 3 };
        assert_eq!(ty.parse_value("abc", None).unwrap(), Value::from("abc"));
        assert!(ty.parse_value("abcd", None).is_err());
    }

    #[test]
    fn test_parse_boolean() {
        assert_eq!(ColumnType::Boolean.parse_value("TRUE", None).unwrap(), Value::Boolean(true));
        assert_eq!(ColumnType::Boolean.parse_value("0", None).unwrap(), Value::Boolean(false));
        assert!(ColumnType::Boolean.parse_value("maybe", None).is_err());
    }

    #[test]
    fn test_parse_datetime_with_day_first_format() {
        let value = ColumnType::DateTime
            .parse_value("25/12/2017", Some("%d/%m/%Y"))
            .unwrap();
        let expected = NaiveDate::from_ymd_opt(2017, 12, 25)
            .unwrap()
            .and_time(NaiveTime::MIN);
        assert_eq!(value, Value::Timestamp(expected));

        assert!(
            ColumnType::DateTime
                .parse_value("2017-12-25", Some("%d/%m/%Y"))
                .is_err()
        );
    }

    #[test]
    fn test_parse_datetime_defaults() {
        let value = ColumnType::DateTime
            .parse_value("2024-03-01 10:15:00", None)
            .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap();
        assert_eq!(value, Value::Timestamp(expected));

        let date_only = ColumnType::DateTime.parse_value("2024-03-01", None).unwrap();
        assert!(matches!(date_only, Value::Timestamp(_)));
    }

    #[test]
    fn test_parse_date() {
        let value = ColumnType::Date.parse_value("2024-02-29", None).unwrap();
        assert_eq!(value, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        assert!(ColumnType::Date.parse_value("2023-02-29", None).is_err());
    }
}
