//! # pg-stream-export
//!
//! Stream a PostgreSQL query result to a line-oriented file in bounded memory.
//!
//! The query runs through a server-side portal and is fetched in batches.
//! Each record is enriched with a description and a capture timestamp and
//! written as one line:
//!
//! ```text
//! 0, Row 0, Fri Oct 16 2026 10:00:00 GMT+0200
//! ```
//!
//! Features:
//!
//! - **Batched cursor**: at most one batch held per stage
//! - **Backpressure**: pulling pauses while the file sink drains
//! - **Optional read-ahead**: a bounded queue of prefetched batches
//! - **Cancellation**: stops pulling, drains the sink, reports CANCELLED
//! - **Run report**: terminal state, counts and timings as JSON
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_stream_export::{run_export, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_stream_export::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let report = run_export(&config, &CancellationToken::new()).await?;
//!     println!("Exported {} rows", report.records);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod postgres;
pub mod sink;
pub mod transform;

// Re-exports for convenient access
pub use config::{Config, OutputConfig, PipelineConfig, QueryConfig, QueryParam, SourceConfig};
pub use crate::core::{
    Chunk, ConnectionPool, EnrichedRecord, QuerySpec, Readiness, Record, RecordSink, RecordSource,
    Value,
};
pub use error::{ExportError, Result};
pub use pipeline::{run_export, Pipeline, PipelineState, RunReport};
pub use postgres::{PgPool, SslMode};
pub use sink::FileSink;
pub use transform::{Clock, RowRenderer, SystemClock};
