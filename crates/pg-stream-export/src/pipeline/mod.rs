//! Export pipeline: a state machine that streams a query result through the
//! renderer into a sink.
//!
//! - [`Pipeline`]: drives one run from IDLE to a terminal state
//! - [`PipelineState`]: lifecycle states and legal transitions
//! - [`Lease`]: scoped ownership of the pooled connection handle
//! - [`RunReport`]: terminal outcome, counts and timings
//!
//! # Flow
//!
//! ```text
//! pool.acquire ─► source.next_batch ─► renderer.render ─► sink.write
//!                       ▲                                     │
//!                       └──────── sink.ready (on Pending) ◄───┘
//! ```
//!
//! Cancellation stops pulling and drains the sink; it is reported as
//! CANCELLED, never as a failure.

mod driver;
mod lease;
mod report;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{Pipeline, PipelineOptions};
pub use lease::Lease;
pub use report::{ErrorSummary, RunReport, CANCELLED_EXIT_CODE};
pub use state::PipelineState;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::QuerySpec;
use crate::error::Result;
use crate::postgres::PgPool;
use crate::sink::FileSink;

/// Run one export as described by `config`.
///
/// Setup failures (pool construction, creating the output file) are returned
/// as errors. Everything after that ends in a [`RunReport`].
pub async fn run_export(config: &Config, cancel: &CancellationToken) -> Result<RunReport> {
    let pool = PgPool::new(&config.source)?;
    let mut sink = FileSink::create(&config.output.path, config.output.high_water_mark).await?;

    let pipeline = Pipeline::new(pool, config.pipeline.key_field.clone())
        .with_read_ahead(config.pipeline.read_ahead);
    let query = QuerySpec::from(&config.query);

    let report = pipeline.run(&query, &mut sink, cancel).await;
    pipeline.pool().close();
    Ok(report)
}
