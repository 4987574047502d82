//! Core abstractions for the export pipeline.
//!
//! - [`traits`]: pool, source and sink seams
//! - [`value`]: records, enriched records and output chunks

pub mod traits;
pub mod value;

pub use traits::{ConnectionPool, QuerySpec, Readiness, RecordSink, RecordSource};
pub use value::{Chunk, EnrichedRecord, Record, Value};
