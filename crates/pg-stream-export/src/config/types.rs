//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Default rows fetched per cursor round trip.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default sink buffer size, in bytes, before it reports backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Upper bound on batches the reader may fetch ahead of the writer.
pub const MAX_READ_AHEAD: usize = 4;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    pub source: SourceConfig,

    /// Query to stream.
    pub query: QueryConfig,

    /// Output file configuration.
    #[serde(default)]
    pub output: OutputConfig,

    /// Pipeline behavior configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Source database (PostgreSQL) configuration.
///
/// Either `url` or the discrete `host`/`database`/`user` fields must be set.
/// When both are present, discrete fields override the URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// libpq-style connection string or `postgres://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// A positional query parameter as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// SQL text with `$1`, `$2`, ... placeholders.
    pub sql: String,

    /// Positional parameters bound to the placeholders in order.
    #[serde(default)]
    pub params: Vec<QueryParam>,

    /// Rows fetched per round trip (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Output file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output file path; truncated at the start of each run.
    #[serde(default = "default_output_path")]
    pub path: String,

    /// Buffered bytes at which the sink reports backpressure.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            high_water_mark: default_high_water_mark(),
        }
    }
}

/// Pipeline behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the integer field that identifies each record (default: "num").
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Batches fetched ahead of the writer. 0 pulls in lockstep with the sink.
    #[serde(default)]
    pub read_ahead: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            key_field: default_key_field(),
            read_ahead: 0,
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_output_path() -> String {
    "output.csv".to_string()
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_key_field() -> String {
    "num".to_string()
}
