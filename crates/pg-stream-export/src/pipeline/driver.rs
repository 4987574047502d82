//! The pipeline driver: acquire, stream, drain, report.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MAX_READ_AHEAD;
use crate::core::{ConnectionPool, QuerySpec, Readiness, Record, RecordSink, RecordSource};
use crate::error::{ExportError, Result};
use crate::transform::{Clock, RowRenderer, SystemClock};

use super::lease::Lease;
use super::report::{RunReport, RunTracker, StreamEnd};
use super::state::PipelineState;

/// Tuning for one pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Batches fetched ahead of the sink. 0 runs pull and push in lockstep.
    pub read_ahead: usize,
}

impl PipelineOptions {
    /// Most records held between the source and the sink at any time.
    ///
    /// Lockstep holds the batch being written. With read-ahead, `n` batches
    /// sit in the queue, one waits to be queued and one is being written.
    pub fn buffered_record_bound(&self, batch_size: usize) -> usize {
        if self.read_ahead == 0 {
            batch_size
        } else {
            (self.read_ahead + 2) * batch_size
        }
    }
}

/// Tracks records pulled from the source but not yet handed to the sink.
#[derive(Debug, Default)]
struct BufferGauge {
    pulled: AtomicU64,
    consumed: AtomicU64,
    peak: AtomicU64,
}

impl BufferGauge {
    fn pulled(&self, records: usize) {
        let pulled = self.pulled.fetch_add(records as u64, Ordering::Relaxed) + records as u64;
        let buffered = pulled.saturating_sub(self.consumed.load(Ordering::Relaxed));
        self.peak.fetch_max(buffered, Ordering::Relaxed);
    }

    fn consumed(&self, records: usize) {
        self.consumed.fetch_add(records as u64, Ordering::Relaxed);
    }

    fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Streams one query result through the renderer into a sink.
///
/// The pool is owned by the pipeline and leased from once per
/// [`run`](Pipeline::run). Runs share no mutable state.
pub struct Pipeline<P, C = SystemClock> {
    pool: P,
    renderer: RowRenderer<C>,
    options: PipelineOptions,
}

impl<P: ConnectionPool> Pipeline<P, SystemClock> {
    /// Pipeline keyed on `key_field`, stamping records with the system clock.
    pub fn new(pool: P, key_field: impl Into<String>) -> Self {
        Self::with_renderer(pool, RowRenderer::new(key_field))
    }
}

impl<P: ConnectionPool, C: Clock> Pipeline<P, C> {
    pub fn with_renderer(pool: P, renderer: RowRenderer<C>) -> Self {
        Self {
            pool,
            renderer,
            options: PipelineOptions::default(),
        }
    }

    /// Fetch up to `batches` ahead of the sink (capped at 4).
    pub fn with_read_ahead(mut self, batches: usize) -> Self {
        self.options.read_ahead = batches.min(MAX_READ_AHEAD);
        self
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run the export to completion, failure or cancellation.
    ///
    /// Never returns early: every outcome, including errors, ends in a
    /// terminal [`RunReport`]. The sink is closed and the leased handle
    /// released before this returns.
    pub async fn run<S>(&self, query: &QuerySpec, sink: &mut S, cancel: &CancellationToken) -> RunReport
    where
        S: RecordSink + ?Sized,
    {
        let mut tracker = RunTracker::new(sink.describe());
        let gauge = BufferGauge::default();

        info!(
            "Exporting to {} (batch size {}, read-ahead {})",
            sink.describe(),
            query.batch_size,
            self.options.read_ahead
        );

        tracker.advance(PipelineState::Acquiring);
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.pool.acquire() => Some(result),
        };

        let outcome = match acquired {
            None => {
                info!("Cancelled before a connection was acquired");
                self.settle(Ok(StreamEnd::Cancelled), sink, &mut tracker).await
            }
            Some(Err(e)) => self.settle(Err(e), sink, &mut tracker).await,
            Some(Ok(handle)) => {
                let mut lease = Lease::new(&self.pool, handle);
                let streamed = self
                    .stream(&mut lease, query, sink, cancel, &mut tracker, &gauge)
                    .await;
                let outcome = self.settle(streamed, sink, &mut tracker).await;
                lease.release();
                outcome
            }
        };

        tracker.finish(outcome, gauge.peak())
    }

    async fn stream<S>(
        &self,
        lease: &mut Lease<'_, P>,
        query: &QuerySpec,
        sink: &mut S,
        cancel: &CancellationToken,
        tracker: &mut RunTracker,
        gauge: &BufferGauge,
    ) -> Result<StreamEnd>
    where
        S: RecordSink + ?Sized,
    {
        let handle = lease.handle_mut()?;
        let mut source = self.pool.open_source(handle, query).await?;
        tracker.advance(PipelineState::Streaming);

        let pumped = if self.options.read_ahead == 0 {
            self.pump_lockstep(&mut *source, sink, cancel, tracker, gauge)
                .await
        } else {
            self.pump_read_ahead(&mut *source, sink, cancel, tracker, gauge)
                .await
        };

        match pumped {
            Ok(StreamEnd::Exhausted) => {
                source.finish().await?;
                debug!("Source exhausted after {} batches", tracker.batches);
                Ok(StreamEnd::Exhausted)
            }
            Ok(StreamEnd::Cancelled) => {
                info!("Cancelled after {} records", tracker.records);
                if let Err(e) = source.cancel().await {
                    warn!("Failed to close cursor after cancel: {}", e);
                }
                Ok(StreamEnd::Cancelled)
            }
            Err(e) => {
                if let Err(cancel_err) = source.cancel().await {
                    warn!("Failed to close cursor after error: {}", cancel_err);
                }
                Err(e)
            }
        }
    }

    /// Pull, render and push one batch at a time. The source is never pulled
    /// while the sink is not ready.
    async fn pump_lockstep<R, S>(
        &self,
        source: &mut R,
        sink: &mut S,
        cancel: &CancellationToken,
        tracker: &mut RunTracker,
        gauge: &BufferGauge,
    ) -> Result<StreamEnd>
    where
        R: RecordSource + ?Sized,
        S: RecordSink + ?Sized,
    {
        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                batch = source.next_batch() => batch?,
            };
            let Some(batch) = batch else {
                return Ok(StreamEnd::Exhausted);
            };
            gauge.pulled(batch.len());
            self.push_batch(batch, sink, tracker, gauge).await?;
        }
    }

    /// Pull on a producer stage feeding a bounded queue, push on a consumer
    /// stage. Both run on the current task.
    async fn pump_read_ahead<R, S>(
        &self,
        source: &mut R,
        sink: &mut S,
        cancel: &CancellationToken,
        tracker: &mut RunTracker,
        gauge: &BufferGauge,
    ) -> Result<StreamEnd>
    where
        R: RecordSource + ?Sized,
        S: RecordSink + ?Sized,
    {
        let (tx, rx) = mpsc::channel::<Vec<Record>>(self.options.read_ahead.max(1));

        let (end, ()) = tokio::try_join!(
            produce(source, tx, cancel, gauge),
            self.consume(rx, sink, tracker, gauge),
        )?;
        Ok(end)
    }

    async fn consume<S>(
        &self,
        mut rx: mpsc::Receiver<Vec<Record>>,
        sink: &mut S,
        tracker: &mut RunTracker,
        gauge: &BufferGauge,
    ) -> Result<()>
    where
        S: RecordSink + ?Sized,
    {
        while let Some(batch) = rx.recv().await {
            self.push_batch(batch, sink, tracker, gauge).await?;
        }
        Ok(())
    }

    async fn push_batch<S>(
        &self,
        batch: Vec<Record>,
        sink: &mut S,
        tracker: &mut RunTracker,
        gauge: &BufferGauge,
    ) -> Result<()>
    where
        S: RecordSink + ?Sized,
    {
        tracker.batches += 1;
        for record in batch {
            let chunk = self.renderer.render(record, tracker.records)?;
            let len = chunk.len() as u64;

            let readiness = sink.write(chunk).await?;
            tracker.records += 1;
            tracker.bytes += len;
            gauge.consumed(1);

            if readiness == Readiness::Pending {
                tracker.backpressure_waits += 1;
                sink.ready().await?;
            }
        }
        Ok(())
    }

    /// Close the sink and decide the terminal outcome.
    async fn settle<S>(
        &self,
        outcome: Result<StreamEnd>,
        sink: &mut S,
        tracker: &mut RunTracker,
    ) -> Result<StreamEnd>
    where
        S: RecordSink + ?Sized,
    {
        match outcome {
            Ok(end) => {
                tracker.advance(PipelineState::Draining);
                if let Err(e) = sink.close().await {
                    error!("{}: close failed: {}", sink.describe(), e);
                    if let Err(mark_err) = sink.mark_incomplete(&e.to_string()).await {
                        warn!("{}: could not mark incomplete: {}", sink.describe(), mark_err);
                    }
                    return Err(e);
                }
                match end {
                    StreamEnd::Exhausted => sink.mark_complete().await?,
                    StreamEnd::Cancelled => {
                        if let Err(e) = sink.mark_incomplete("cancelled").await {
                            warn!("{}: could not mark incomplete: {}", sink.describe(), e);
                        }
                    }
                }
                Ok(end)
            }
            Err(e) => {
                error!("Export failed in {}: {}", tracker.state(), e);
                if let Err(abort_err) = sink.abort(&e.to_string()).await {
                    warn!("{}: abort failed: {}", sink.describe(), abort_err);
                }
                Err(e)
            }
        }
    }
}

/// Producer stage: pull batches until the source is exhausted or cancel fires.
/// Blocks on `tx` while the queue is full.
async fn produce<R>(
    source: &mut R,
    tx: mpsc::Sender<Vec<Record>>,
    cancel: &CancellationToken,
    gauge: &BufferGauge,
) -> Result<StreamEnd>
where
    R: RecordSource + ?Sized,
{
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            batch = source.next_batch() => batch?,
        };
        let Some(batch) = batch else {
            return Ok(StreamEnd::Exhausted);
        };
        gauge.pulled(batch.len());
        if tx.send(batch).await.is_err() {
            return Err(ExportError::source_failed("record consumer stopped"));
        }
    }
}
