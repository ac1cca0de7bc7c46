//! Pipeline configuration
//!
//! Handles parsing of the YAML configuration file, environment variable overrides,
//! and resolution of the dataset list into validated [`DatasetSpec`]s in load order.

pub mod credentials;

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

pub use credentials::Credentials;

use crate::models::{ColumnSpec, ColumnType, DatasetSpec, ForeignKey, LAST_UPDATED, TypeSpec};
use crate::transform::{self, TransformSpec};
use crate::validation::{self, ValidationError};

/// Default configuration filename
pub const DEFAULT_CONFIG_FILENAME: &str = "config.yaml";

/// Environment variable naming the configuration file
pub const ENV_CONFIG: &str = "RETAIL_ETL_CONFIG";

/// Environment variable for the input directory
pub const ENV_DATA_ROOT: &str = "RETAIL_ETL_DATA_ROOT";

/// Environment variable for the archive directory
pub const ENV_ARCHIVE_ROOT: &str = "RETAIL_ETL_ARCHIVE_ROOT";

/// Environment variable for the database host
pub const ENV_DB_HOST: &str = "RETAIL_ETL_DB_HOST";

/// Environment variable for the database port
pub const ENV_DB_PORT: &str = "RETAIL_ETL_DB_PORT";

/// Environment variable for the database name
pub const ENV_DB_NAME: &str = "RETAIL_ETL_DB_NAME";

/// Environment variable for the database schema
pub const ENV_DB_SCHEMA: &str = "RETAIL_ETL_DB_SCHEMA";

/// Environment variable for the credentials file
pub const ENV_CREDENTIALS_FILE: &str = "RETAIL_ETL_CREDENTIALS_FILE";

/// `application_name` reported to PostgreSQL
const APPLICATION_NAME: &str = "retail-etl";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Configuration is not valid YAML or misses required keys
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Unknown or malformed column type
    #[error("Dataset '{dataset}', column '{column}': {message}")]
    InvalidType {
        dataset: String,
        column: String,
        message: String,
    },

    #[error("No datasets configured")]
    NoDatasets,

    /// Structurally invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(#[from] ValidationError),

    /// Credentials file missing or malformed
    #[error("Failed to read credentials file {path}: {message}")]
    Credentials { path: PathBuf, message: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Input and archive locations
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Directory holding the CSV snapshots
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Directory receiving processed files
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("archive")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            archive_root: default_archive_root(),
        }
    }
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DbSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name
    pub database: String,

    /// Two-line user/password file
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,

    /// Schema put first on the `search_path`
    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.txt")
}

fn default_connect_timeout() -> u64 {
    10
}

impl DbSection {
    /// Build a driver configuration for these settings
    pub fn pg_config(&self, credentials: &Credentials) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&credentials.user)
            .password(&credentials.password)
            .application_name(APPLICATION_NAME)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        if let Some(schema) = &self.schema {
            config.options(&format!("-c search_path={}", schema));
        }
        config
    }

    /// `host:port/database` for log messages
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// SQL generation defaults
#[derive(Debug, Clone, Deserialize)]
pub struct SqlSection {
    /// Length of `String` columns declared without one
    #[serde(default = "default_varchar_len")]
    pub varchar_len: u32,

    /// Rows per multi-row INSERT
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_varchar_len() -> u32 {
    191
}

fn default_batch_size() -> usize {
    1000
}

impl Default for SqlSection {
    fn default() -> Self {
        Self {
            varchar_len: default_varchar_len(),
            batch_size: default_batch_size(),
        }
    }
}

/// CSV input parsing
#[derive(Debug, Clone, Deserialize)]
pub struct CsvSection {
    /// Field values read as NULL, in addition to empty fields
    #[serde(default = "default_null_values")]
    pub null_values: Vec<String>,
}

/// Missing-value markers recognised by default, as written by common CSV exporters
const DEFAULT_NULL_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND",
    "1.#QNAN", "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn default_null_values() -> Vec<String> {
    DEFAULT_NULL_VALUES.iter().map(|v| v.to_string()).collect()
}

impl Default for CsvSection {
    fn default() -> Self {
        Self {
            null_values: default_null_values(),
        }
    }
}

/// Incremental update behaviour
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncrementalSection {
    /// Overwrite matched rows even when unchanged, refreshing `last_updated`
    #[serde(default)]
    pub refresh_unchanged: bool,
}

/// HTTP sources for `fetch`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    /// Where fetched CSVs are written; defaults to `paths.data_root`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,

    /// Dataset name -> URL, fetched in this order
    #[serde(default)]
    pub sources: IndexMap<String, String>,
}

fn default_api_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    file: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    key_columns: Option<Vec<String>>,
    #[serde(default)]
    unique_constraints: Vec<Vec<String>>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKey>,
    dtype: IndexMap<String, TypeSpec>,
    #[serde(default)]
    transform: Option<TransformSpec>,
    /// Replaces `csv.null_values` for this dataset
    #[serde(default)]
    null_values: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    paths: PathsSection,
    db: DbSection,
    #[serde(default)]
    sql: SqlSection,
    #[serde(default)]
    csv: CsvSection,
    #[serde(default)]
    incremental: IncrementalSection,
    #[serde(default)]
    load_sequence: Option<Vec<String>>,
    datasets: IndexMap<String, RawDataset>,
    #[serde(default)]
    api: Option<ApiSection>,
}

/// Validated pipeline configuration
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub paths: PathsSection,
    pub db: DbSection,
    pub sql: SqlSection,
    pub csv: CsvSection,
    pub incremental: IncrementalSection,
    pub api: Option<ApiSection>,
    /// Datasets in load order
    datasets: Vec<DatasetSpec>,
}

impl EtlConfig {
    /// Load configuration from a YAML file and apply environment overrides
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut config = Self::parse(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> ConfigResult<Self> {
        if raw.datasets.is_empty() {
            return Err(ConfigError::NoDatasets);
        }
        if let Some(schema) = &raw.db.schema {
            validation::validate_schema_name(schema)?;
        }
        if raw.sql.batch_size == 0 {
            return Err(ConfigError::Parse("sql.batch_size must be positive".to_string()));
        }

        let mut specs = Vec::with_capacity(raw.datasets.len());
        for (name, dataset) in raw.datasets {
            specs.push(resolve_dataset(name, dataset, &raw.sql, &raw.csv)?);
        }

        validation::validate_datasets(&specs)?;
        let order = match &raw.load_sequence {
            Some(sequence) => validation::check_load_sequence(&specs, sequence)?,
            None => validation::dependency_order(&specs)?,
        };

        let mut slots: Vec<Option<DatasetSpec>> = specs.into_iter().map(Some).collect();
        let datasets = order.into_iter().filter_map(|i| slots[i].take()).collect();

        Ok(Self {
            paths: raw.paths,
            db: raw.db,
            sql: raw.sql,
            csv: raw.csv,
            incremental: raw.incremental,
            api: raw.api,
            datasets,
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_DATA_ROOT) {
            self.paths.data_root = PathBuf::from(root);
        }

        if let Some(root) = lookup(ENV_ARCHIVE_ROOT) {
            self.paths.archive_root = PathBuf::from(root);
        }

        if let Some(host) = lookup(ENV_DB_HOST) {
            self.db.host = host;
        }

        if let Some(port) = lookup(ENV_DB_PORT) {
            match port.parse() {
                Ok(port) => self.db.port = port,
                Err(_) => warn!("Ignoring {}={}: not a port number", ENV_DB_PORT, port),
            }
        }

        if let Some(name) = lookup(ENV_DB_NAME) {
            self.db.database = name;
        }

        if let Some(schema) = lookup(ENV_DB_SCHEMA) {
            match validation::validate_schema_name(&schema) {
                Ok(()) => self.db.schema = Some(schema),
                Err(e) => warn!("Ignoring {}: {}", ENV_DB_SCHEMA, e),
            }
        }

        if let Some(path) = lookup(ENV_CREDENTIALS_FILE) {
            self.db.credentials_file = PathBuf::from(path);
        }
    }

    /// Datasets in load order
    pub fn datasets(&self) -> &[DatasetSpec] {
        &self.datasets
    }

    /// Look up a dataset by name
    pub fn dataset(&self, name: &str) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Input file of a dataset
    pub fn source_path(&self, dataset: &DatasetSpec) -> PathBuf {
        self.paths.data_root.join(&dataset.file)
    }

    /// Read the credentials file named by `db.credentials_file`
    pub fn credentials(&self) -> ConfigResult<Credentials> {
        Credentials::read(&self.db.credentials_file)
    }
}

fn resolve_dataset(
    name: String,
    raw: RawDataset,
    sql: &SqlSection,
    csv: &CsvSection,
) -> ConfigResult<DatasetSpec> {
    let mut columns = Vec::with_capacity(raw.dtype.len());
    for (column, spec) in raw.dtype {
        if column == LAST_UPDATED {
            warn!(
                "Dataset '{}' declares '{}'; it is managed by the pipeline and ignored",
                name, LAST_UPDATED
            );
            continue;
        }
        let ty = ColumnType::from_spec(&spec, sql.varchar_len).map_err(|message| {
            ConfigError::InvalidType {
                dataset: name.clone(),
                column: column.clone(),
                message,
            }
        })?;
        columns.push(ColumnSpec::new(column, ty));
    }

    let key_columns = raw
        .key_columns
        .unwrap_or_else(|| raw.primary_key.clone());
    let transform = transform::resolve(&name, raw.transform);

    Ok(DatasetSpec {
        table: raw.table.unwrap_or_else(|| name.clone()),
        name,
        file: raw.file,
        columns,
        primary_key: raw.primary_key,
        key_columns,
        unique_constraints: raw.unique_constraints,
        foreign_keys: raw.foreign_keys,
        transform,
        null_values: raw.null_values.unwrap_or_else(|| csv.null_values.clone()),
    })
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    include_str!("../../config.example.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
db:
  database: retail
datasets:
  products:
    file: products.csv
    primary_key: [product_id]
    foreign_keys:
      - columns: [brand_id]
        ref_table: brands
        ref_columns: [brand_id]
        on_delete: RESTRICT
    dtype:
      product_id: Integer
      brand_id: Integer
      product_name: {type: String, length: 80}
      last_updated: DateTime
  brands:
    file: brands.csv
    primary_key: [brand_id]
    dtype:
      brand_id: Integer
      brand_name: String
"#;

    #[test]
    fn test_sample_config_is_valid() {
        let sample = sample_config();
        let config = EtlConfig::parse(sample);
        assert!(config.is_ok(), "Sample config should be valid: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.datasets().len(), 9);
        assert_eq!(config.datasets()[0].name, "brands");
        assert_eq!(config.datasets()[8].name, "stocks");
        assert_eq!(config.sql.varchar_len, 191);
    }

    #[test]
    fn test_defaults_and_derived_order() {
        let config = EtlConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.db.host, "127.0.0.1");
        assert_eq!(config.db.port, 5432);
        assert_eq!(config.paths.data_root, PathBuf::from("data"));
        assert_eq!(config.sql.batch_size, 1000);
        assert!(!config.incremental.refresh_unchanged);
        assert!(config.csv.null_values.iter().any(|v| v == "NULL"));

        let names: Vec<&str> = config.datasets().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["brands", "products"]);
    }

    #[test]
    fn test_dataset_resolution() {
        let config = EtlConfig::parse(MINIMAL).unwrap();
        let products = config.dataset("products").unwrap();

        assert_eq!(products.table, "products");
        assert_eq!(products.key_columns, vec!["product_id".to_string()]);
        assert_eq!(
            products.column_names(),
            vec!["product_id", "brand_id", "product_name"]
        );
        assert_eq!(
            products.column("product_name").map(|c| c.ty),
            Some(ColumnType::String { length: 80 })
        );
        assert_eq!(
            products.transform,
            transform::builtin("products").unwrap()
        );
        assert_eq!(
            config.source_path(products),
            PathBuf::from("data").join("products.csv")
        );
    }

    #[test]
    fn test_null_values_override_per_dataset() {
        let yaml = MINIMAL
            .replace("db:\n", "csv:\n  null_values: [\"-\"]\ndb:\n")
            .replace(
                "    file: brands.csv\n",
                "    file: brands.csv\n    null_values: [\"?\", \"NULL\"]\n",
            );
        let config = EtlConfig::parse(&yaml).unwrap();

        assert_eq!(config.csv.null_values, vec!["-".to_string()]);
        assert_eq!(
            config.dataset("products").unwrap().null_values,
            vec!["-".to_string()]
        );
        assert_eq!(
            config.dataset("brands").unwrap().null_values,
            vec!["?".to_string(), "NULL".to_string()]
        );
    }

    #[test]
    fn test_missing_db_section_is_fatal() {
        let yaml = "datasets:\n  a:\n    file: a.csv\n    primary_key: [id]\n    dtype: {id: Integer}\n";
        assert!(matches!(EtlConfig::parse(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let yaml = "db: {database: x}\ndatasets:\n  a:\n    file: a.csv\n    primary_key: [id]\n    dtype: {id: Money}\n";
        assert!(matches!(
            EtlConfig::parse(yaml),
            Err(ConfigError::InvalidType { .. })
        ));
    }

    #[test]
    fn test_invalid_load_sequence() {
        let yaml = format!("{}load_sequence: [products, brands]\n", MINIMAL);
        assert!(matches!(
            EtlConfig::parse(&yaml),
            Err(ConfigError::Invalid(ValidationError::LoadSequence(_)))
        ));
    }

    #[test]
    fn test_invalid_table_name() {
        let yaml = "db: {database: x}\ndatasets:\n  a:\n    file: a.csv\n    table: \"a; drop\"\n    primary_key: [id]\n    dtype: {id: Integer}\n";
        assert!(matches!(
            EtlConfig::parse(yaml),
            Err(ConfigError::Invalid(ValidationError::InvalidIdentifier { .. }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EtlConfig::parse(MINIMAL).unwrap();
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DATA_ROOT, "/srv/in"),
            (ENV_DB_HOST, "db.internal"),
            (ENV_DB_PORT, "6543"),
            (ENV_DB_SCHEMA, "bad schema"),
            (ENV_CREDENTIALS_FILE, "/run/secrets/db"),
        ]);
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.paths.data_root, PathBuf::from("/srv/in"));
        assert_eq!(config.paths.archive_root, PathBuf::from("archive"));
        assert_eq!(config.db.host, "db.internal");
        assert_eq!(config.db.port, 6543);
        assert_eq!(config.db.schema, None);
        assert_eq!(config.db.credentials_file, PathBuf::from("/run/secrets/db"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILENAME);
        std::fs::write(&path, MINIMAL).unwrap();

        let config = EtlConfig::load(&path).unwrap();
        assert_eq!(config.db.database, "retail");

        let missing = EtlConfig::load(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_pg_config() {
        let config = EtlConfig::parse(MINIMAL).unwrap();
        let creds = Credentials::parse("etl\nsecret\n").unwrap();
        let pg = config.db.pg_config(&creds);
        assert_eq!(pg.get_user(), Some("etl"));
        assert_eq!(pg.get_dbname(), Some("retail"));
        assert_eq!(pg.get_ports(), &[5432]);
        assert_eq!(config.db.display_target(), "127.0.0.1:5432/retail");
    }
}
