//! Configuration loading and validation tests

use std::fs;

use retail_etl::config::{ConfigError, EtlConfig};
use retail_etl::models::ReferentialAction;
use retail_etl::sample_config;
use retail_etl::validation::ValidationError;
use tempfile::tempdir;

const HEADER: &str = "db: {database: retail}\n";

fn parse(datasets: &str) -> Result<EtlConfig, ConfigError> {
    EtlConfig::parse(&format!("{}datasets:\n{}", HEADER, datasets))
}

#[test]
fn test_dependency_order_without_load_sequence() {
    let sample = sample_config();
    let start = sample.find("load_sequence:").unwrap();
    let end = sample.find("datasets:").unwrap();
    let without_sequence = format!("{}{}", &sample[..start], &sample[end..]);

    let config = EtlConfig::parse(&without_sequence).unwrap();
    let position = |name: &str| {
        config
            .datasets()
            .iter()
            .position(|d| d.name == name)
            .unwrap()
    };

    for spec in config.datasets() {
        for parent in spec.parent_tables() {
            assert!(
                position(parent) < position(&spec.name),
                "{} must load before {}",
                parent,
                spec.name
            );
        }
    }
}

#[test]
fn test_sample_foreign_key_actions() {
    let config = EtlConfig::parse(sample_config()).unwrap();
    let items = config.dataset("order_items").unwrap();
    let to_orders = items
        .foreign_keys
        .iter()
        .find(|fk| fk.ref_table == "orders")
        .unwrap();
    assert_eq!(to_orders.on_delete, ReferentialAction::Cascade);

    let stocks = config.dataset("stocks").unwrap();
    assert!(
        stocks
            .foreign_keys
            .iter()
            .all(|fk| fk.on_delete == ReferentialAction::Restrict)
    );
}

#[test]
fn test_foreign_key_cycle_is_rejected() {
    let result = parse(
        "  a:\n    file: a.csv\n    primary_key: [id]\n    foreign_keys:\n      - {columns: [b_id], ref_table: b, ref_columns: [id]}\n    dtype: {id: Integer, b_id: Integer}\n  \
         b:\n    file: b.csv\n    primary_key: [id]\n    foreign_keys:\n      - {columns: [a_id], ref_table: a, ref_columns: [id]}\n    dtype: {id: Integer, a_id: Integer}\n",
    );
    assert!(matches!(
        result,
        Err(ConfigError::Invalid(ValidationError::Cycle(_)))
    ));
}

#[test]
fn test_key_must_match_a_constraint() {
    let result = parse(
        "  a:\n    file: a.csv\n    primary_key: [id]\n    key_columns: [name]\n    dtype: {id: Integer, name: String}\n",
    );
    assert!(matches!(
        result,
        Err(ConfigError::Invalid(ValidationError::InvalidKey { .. }))
    ));
}

#[test]
fn test_dataset_without_any_key_is_rejected() {
    let result = parse("  a:\n    file: a.csv\n    dtype: {id: Integer}\n");
    assert!(matches!(
        result,
        Err(ConfigError::Invalid(ValidationError::NoKey { .. }))
    ));
}

#[test]
fn test_foreign_key_to_unknown_table() {
    let result = parse(
        "  a:\n    file: a.csv\n    primary_key: [id]\n    foreign_keys:\n      - {columns: [x_id], ref_table: x, ref_columns: [id]}\n    dtype: {id: Integer, x_id: Integer}\n",
    );
    assert!(matches!(
        result,
        Err(ConfigError::Invalid(ValidationError::InvalidForeignKey { .. }))
    ));
}

#[test]
fn test_no_datasets() {
    let result = EtlConfig::parse(&format!("{}datasets: {{}}\n", HEADER));
    assert!(matches!(result, Err(ConfigError::NoDatasets)));
}

#[test]
fn test_credentials_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("credentials.txt");
    fs::write(&path, "etl_user\n  s3cret \n").unwrap();

    let mut config = EtlConfig::parse(sample_config()).unwrap();
    config.db.credentials_file = path.clone();
    let credentials = config.credentials().unwrap();
    assert_eq!(credentials.user, "etl_user");
    assert_eq!(credentials.password, "s3cret");
    assert!(!format!("{:?}", credentials).contains("s3cret"));

    fs::write(&path, "etl_user\n").unwrap();
    assert!(matches!(
        config.credentials(),
        Err(ConfigError::Credentials { .. })
    ));
}
