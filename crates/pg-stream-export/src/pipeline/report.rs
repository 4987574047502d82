//! Run bookkeeping and the terminal report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{ExportError, Result};

use super::state::PipelineState;

/// Exit code reported for a cancelled run.
pub const CANCELLED_EXIT_CODE: u8 = 130;

/// How the streaming phase ended, when it ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    Exhausted,
    Cancelled,
}

/// Error details carried in a serialized report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub kind: String,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Terminal state: completed, failed or cancelled.
    pub state: PipelineState,

    /// Where the output went.
    pub output: String,

    /// False whenever the output is a prefix of the result set.
    pub output_complete: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run reached its terminal state.
    pub finished_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Records transformed and handed to the sink.
    pub records: u64,

    /// Batches pulled from the source and processed.
    pub batches: u64,

    /// Bytes of rendered output handed to the sink.
    pub bytes: u64,

    /// Average throughput.
    pub rows_per_second: f64,

    /// Times the sink reported backpressure.
    pub backpressure_waits: u64,

    /// Most records pulled from the source but not yet written at any point.
    pub peak_buffered_records: u64,

    /// Every state the run passed through, in order.
    pub transitions: Vec<PipelineState>,

    /// Failure details, if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,

    #[serde(skip)]
    failure: Option<ExportError>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == PipelineState::Cancelled
    }

    /// The error that failed the run.
    pub fn failure(&self) -> Option<&ExportError> {
        self.failure.as_ref()
    }

    /// Process exit code: 0 completed, 130 cancelled, per-kind code on failure.
    pub fn exit_code(&self) -> u8 {
        match self.state {
            PipelineState::Completed => 0,
            PipelineState::Cancelled => CANCELLED_EXIT_CODE,
            _ => self.failure.as_ref().map_or(1, ExportError::exit_code),
        }
    }

    /// Serialize the report as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} records ({} bytes) to {} in {:.2}s ({:.0} rows/sec)",
            self.state,
            self.records,
            self.bytes,
            self.output,
            self.duration_seconds,
            self.rows_per_second
        )
    }
}

/// Mutable state of a run in progress.
pub(crate) struct RunTracker {
    state: PipelineState,
    transitions: Vec<PipelineState>,
    output: String,
    started_at: DateTime<Utc>,
    start: Instant,
    pub records: u64,
    pub batches: u64,
    pub bytes: u64,
    pub backpressure_waits: u64,
}

impl RunTracker {
    pub fn new(output: String) -> Self {
        Self {
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
            output,
            started_at: Utc::now(),
            start: Instant::now(),
            records: 0,
            batches: 0,
            bytes: 0,
            backpressure_waits: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!("Pipeline {} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    /// Move to the terminal state for `outcome` and build the report.
    pub fn finish(mut self, outcome: Result<StreamEnd>, peak_buffered_records: u64) -> RunReport {
        let (terminal, failure) = match outcome {
            Ok(StreamEnd::Exhausted) => (PipelineState::Completed, None),
            Ok(StreamEnd::Cancelled) => (PipelineState::Cancelled, None),
            Err(e) => (PipelineState::Failed, Some(e)),
        };
        self.advance(terminal);

        let elapsed = self.start.elapsed();
        let duration_seconds = elapsed.as_secs_f64();
        let rows_per_second = if duration_seconds > 0.0 {
            self.records as f64 / duration_seconds
        } else {
            0.0
        };

        let report = RunReport {
            state: terminal,
            output_complete: terminal == PipelineState::Completed,
            output: self.output,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_seconds,
            records: self.records,
            batches: self.batches,
            bytes: self.bytes,
            rows_per_second,
            backpressure_waits: self.backpressure_waits,
            peak_buffered_records,
            transitions: self.transitions,
            error: failure.as_ref().map(|e| ErrorSummary {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }),
            failure,
        };

        info!("{}", report.summary());
        report
    }
}
