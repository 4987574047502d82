//! Error types for the export pipeline.

use thiserror::Error;

/// Main error type for export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source database query or cursor error
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Source failure that did not originate in the driver (conversion, fake sources)
    #[error("Source error: {0}")]
    SourceFailed(String),

    /// A record could not be transformed. This is a contract violation, not a
    /// data-dependent condition, and always aborts the run.
    #[error("Transform failed at record {position}: {message}")]
    Transform { position: u64, message: String },

    /// Sink write, flush or close failure
    #[error("Sink error ({path}): {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error (file operations outside the sink)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExportError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        ExportError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a source error that is not a driver error.
    pub fn source_failed(message: impl Into<String>) -> Self {
        ExportError::SourceFailed(message.into())
    }

    /// Create a Transform error for the record at `position`.
    pub fn transform(position: u64, message: impl Into<String>) -> Self {
        ExportError::Transform {
            position,
            message: message.into(),
        }
    }

    /// Create a Sink error for the output at `path`.
    pub fn sink(path: impl Into<String>, source: std::io::Error) -> Self {
        ExportError::Sink {
            path: path.into(),
            source,
        }
    }

    /// Short classification used in logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::Config(_) => "config",
            ExportError::Pool { .. } => "pool",
            ExportError::Source(_) | ExportError::SourceFailed(_) => "source",
            ExportError::Transform { .. } => "transform",
            ExportError::Sink { .. } => "sink",
            ExportError::Io(_) => "io",
            ExportError::Yaml(_) | ExportError::Json(_) => "serialization",
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExportError::Config(_) | ExportError::Yaml(_) => 2,
            ExportError::Pool { .. } | ExportError::Source(_) | ExportError::SourceFailed(_) => 3,
            ExportError::Transform { .. } => 4,
            ExportError::Sink { .. } | ExportError::Io(_) => 5,
            ExportError::Json(_) => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;
