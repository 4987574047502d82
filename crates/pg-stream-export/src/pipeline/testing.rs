//! In-memory pool, source and sink for driving the pipeline in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{Chunk, ConnectionPool, QuerySpec, Readiness, Record, RecordSink, RecordSource, Value};
use crate::error::{ExportError, Result};

/// Something the pipeline did to a fake, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Pull,
    Write,
    Pending,
    Ready,
    Close,
}

/// Shared, ordered record of source and sink calls.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

/// What a fake source yields, and where it misbehaves.
#[derive(Debug, Clone)]
pub(crate) struct SourceScript {
    last: i64,
    fail_at_batch: Option<usize>,
    malformed_at: Option<i64>,
    cancel_after: Option<(usize, CancellationToken)>,
    stall_after: Option<usize>,
}

impl SourceScript {
    /// Records `num = 0..=last`, like `generate_series(0, last)`.
    pub fn series(last: i64) -> Self {
        Self {
            last,
            fail_at_batch: None,
            malformed_at: None,
            cancel_after: None,
            stall_after: None,
        }
    }

    /// No records at all.
    pub fn empty() -> Self {
        Self::series(-1)
    }

    /// Fail the pull of batch `index` (zero-based).
    pub fn fail_at_batch(mut self, index: usize) -> Self {
        self.fail_at_batch = Some(index);
        self
    }

    /// Yield a text `num` for record `num`.
    pub fn malformed_at(mut self, num: i64) -> Self {
        self.malformed_at = Some(num);
        self
    }

    /// Never answer once `batches` batches have been handed out.
    pub fn stall_after(mut self, batches: usize) -> Self {
        self.stall_after = Some(batches);
        self
    }

    /// Cancel `token` as soon as `batches` batches have been handed out.
    pub fn cancel_after(mut self, batches: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((batches, token));
        self
    }
}

#[derive(Debug, Default)]
struct CounterCells {
    acquired: AtomicU64,
    released: AtomicU64,
    pulls: AtomicU64,
    finished: AtomicU64,
    cancelled: AtomicU64,
}

/// Call counts shared between a fake pool and the sources it opens.
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolCounters(Arc<CounterCells>);

impl PoolCounters {
    pub fn acquired(&self) -> u64 {
        self.0.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.0.released.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> u64 {
        self.0.pulls.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u64 {
        self.0.finished.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> u64 {
        self.0.cancelled.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeHandle;

pub(crate) struct FakePool {
    script: SourceScript,
    counters: PoolCounters,
    log: EventLog,
    fail_acquire: bool,
    fail_open: bool,
}

impl FakePool {
    pub fn new(script: SourceScript) -> Self {
        Self {
            script,
            counters: PoolCounters::default(),
            log: EventLog::default(),
            fail_acquire: false,
            fail_open: false,
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.counters
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    type Handle = FakeHandle;

    async fn acquire(&self) -> Result<FakeHandle> {
        if self.fail_acquire {
            return Err(ExportError::pool("connection refused", "fake pool"));
        }
        self.counters.0.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle)
    }

    fn release(&self, _handle: FakeHandle) {
        self.counters.0.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn open_source<'h>(
        &self,
        _handle: &'h mut FakeHandle,
        query: &QuerySpec,
    ) -> Result<Box<dyn RecordSource + 'h>> {
        if self.fail_open {
            return Err(ExportError::source_failed("relation \"missing\" does not exist"));
        }
        Ok(Box::new(FakeSource {
            script: self.script.clone(),
            next: 0,
            batch_size: query.batch_size.max(1),
            batches: 0,
            counters: self.counters.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeSource {
    script: SourceScript,
    next: i64,
    batch_size: usize,
    batches: usize,
    counters: PoolCounters,
    log: EventLog,
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        self.log.push(Event::Pull);
        self.counters.0.pulls.fetch_add(1, Ordering::SeqCst);

        if self.script.stall_after == Some(self.batches) {
            std::future::pending::<()>().await;
        }
        if self.script.fail_at_batch == Some(self.batches) {
            return Err(ExportError::source_failed("connection lost"));
        }
        if self.next > self.script.last {
            return Ok(None);
        }

        let end = (self.next + self.batch_size as i64 - 1).min(self.script.last);
        let records = (self.next..=end)
            .map(|num| {
                let value = if self.script.malformed_at == Some(num) {
                    Value::Text(format!("n{}", num))
                } else {
                    Value::Int(num)
                };
                [("num", value)].into_iter().collect::<Record>()
            })
            .collect();
        self.next = end + 1;
        self.batches += 1;

        if let Some((after, token)) = &self.script.cancel_after {
            if self.batches == *after {
                token.cancel();
            }
        }
        Ok(Some(records))
    }

    async fn finish(&mut self) -> Result<()> {
        self.counters.0.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.counters.0.cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Collects chunks in memory. Reports `Pending` every `capacity` writes.
pub(crate) struct MemorySink {
    pub lines: Vec<String>,
    pub closes: usize,
    pub incomplete: Option<String>,
    pub completed: bool,
    capacity: usize,
    buffered: usize,
    writes: usize,
    closed: bool,
    fail_write_at: Option<usize>,
    fail_close: bool,
    log: EventLog,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Vec::new(),
            closes: 0,
            incomplete: None,
            completed: false,
            capacity: capacity.max(1),
            buffered: 0,
            writes: 0,
            closed: false,
            fail_write_at: None,
            fail_close: false,
            log: EventLog::default(),
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Fail write number `index` (zero-based).
    pub fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn error(message: &str) -> ExportError {
        ExportError::sink(
            "memory",
            std::io::Error::new(std::io::ErrorKind::Other, message.to_string()),
        )
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&mut self, chunk: Chunk) -> Result<Readiness> {
        self.log.push(Event::Write);
        if self.closed {
            return Err(Self::error("sink is closed"));
        }
        if self.fail_write_at == Some(self.writes) {
            return Err(Self::error("No space left on device"));
        }
        self.writes += 1;
        self.lines.push(chunk.into_string());
        self.buffered += 1;
        if self.buffered >= self.capacity {
            self.log.push(Event::Pending);
            Ok(Readiness::Pending)
        } else {
            Ok(Readiness::Ready)
        }
    }

    async fn ready(&mut self) -> Result<()> {
        self.log.push(Event::Ready);
        self.buffered = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.closes += 1;
        self.log.push(Event::Close);
        if self.fail_close {
            return Err(Self::error("flush failed"));
        }
        self.buffered = 0;
        Ok(())
    }

    async fn mark_incomplete(&mut self, reason: &str) -> Result<()> {
        self.incomplete = Some(reason.to_string());
        Ok(())
    }

    async fn mark_complete(&mut self) -> Result<()> {
        self.completed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
