//! Core traits for the export pipeline.
//!
//! This module defines the seams between the pipeline driver and the outside
//! world:
//!
//! - [`ConnectionPool`]: leases handles and opens sources over them
//! - [`RecordSource`]: lazy, batched, forward-only record stream
//! - [`RecordSink`]: buffered chunk consumer with a readiness signal
//!
//! The driver only talks to these traits, so the PostgreSQL and file
//! implementations can be swapped for in-memory ones in tests.

use async_trait::async_trait;
use tracing::warn;

use crate::config::{QueryConfig, QueryParam, DEFAULT_BATCH_SIZE};
use crate::error::Result;

use super::value::{Chunk, Record};

/// Query to stream: SQL text, positional parameters and fetch batch size.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// SQL text with `$n` placeholders.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<QueryParam>,
    /// Rows fetched per round trip.
    pub batch_size: usize,
}

impl QuerySpec {
    /// Create a query with no parameters and the default batch size.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the positional parameters.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the fetch batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl From<&QueryConfig> for QuerySpec {
    fn from(config: &QueryConfig) -> Self {
        QuerySpec::new(config.sql.clone())
            .with_params(config.params.clone())
            .with_batch_size(config.batch_size)
    }
}

/// Whether a sink can take more chunks right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Keep writing.
    Ready,
    /// Buffer is full; await [`RecordSink::ready`] before the next write.
    Pending,
}

/// A lazy, forward-only stream of records fetched in batches.
///
/// Implementations hold at most one batch in memory. `None` from
/// [`next_batch`](RecordSource::next_batch) means the result set is exhausted.
#[async_trait]
pub trait RecordSource: Send {
    /// Fetch the next batch of records, or `None` when exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>>;

    /// End the stream after exhaustion.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop early. A cancel is not a failure and must not surface as one.
    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Consumer of rendered chunks.
///
/// `write` buffers and reports [`Readiness::Pending`] once the buffer is full;
/// the caller must await [`ready`](RecordSink::ready) before writing again.
#[async_trait]
pub trait RecordSink: Send {
    /// Hand one chunk to the sink.
    async fn write(&mut self, chunk: Chunk) -> Result<Readiness>;

    /// Wait until the sink can accept more chunks.
    async fn ready(&mut self) -> Result<()>;

    /// Flush buffered data and release the sink's resources. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Record that the output is a truncated prefix of the result set.
    async fn mark_incomplete(&mut self, _reason: &str) -> Result<()> {
        Ok(())
    }

    /// Record that a closed output holds the whole result set.
    async fn mark_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close best-effort and mark the output incomplete.
    ///
    /// A close failure here is logged, not returned: the caller is already
    /// reporting the error that caused the abort.
    async fn abort(&mut self, reason: &str) -> Result<()> {
        if let Err(e) = self.close().await {
            warn!("{}: close during abort failed: {}", self.describe(), e);
        }
        self.mark_incomplete(reason).await
    }

    /// Where the output goes, for logs and reports.
    fn describe(&self) -> String;
}

/// Source of leased connection handles.
///
/// The pool is passed to the pipeline explicitly; the pipeline acquires one
/// handle per run and hands it back through [`release`](ConnectionPool::release)
/// exactly once.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Leased connection type.
    type Handle: Send;

    /// Lease a handle.
    async fn acquire(&self) -> Result<Self::Handle>;

    /// Return a handle to the pool.
    fn release(&self, handle: Self::Handle);

    /// Open a record stream for `query` over a leased handle.
    async fn open_source<'h>(
        &self,
        handle: &'h mut Self::Handle,
        query: &QuerySpec,
    ) -> Result<Box<dyn RecordSource + 'h>>;
}
