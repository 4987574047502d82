//! Per-record transformation.
//!
//! [`RowRenderer`] enriches each record with a label derived from its key
//! field and a capture timestamp, then renders it as one line of text. It
//! holds no per-run state: one record in, one chunk out, in order.

mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use crate::core::{Chunk, EnrichedRecord, Record, Value};
use crate::error::{ExportError, Result};

/// Timestamp layout, e.g. `Fri Oct 16 2026 10:00:00 GMT+0200`.
pub const TIMESTAMP_FORMAT: &str = "%a %b %d %Y %H:%M:%S GMT%z";

/// Enriches records and renders them to output lines.
#[derive(Debug, Clone)]
pub struct RowRenderer<C = SystemClock> {
    key_field: String,
    clock: C,
}

impl RowRenderer<SystemClock> {
    /// Renderer keyed on `key_field`, reading the system clock.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self::with_clock(key_field, SystemClock)
    }
}

impl<C: Clock> RowRenderer<C> {
    /// Renderer keyed on `key_field`, reading `clock`.
    pub fn with_clock(key_field: impl Into<String>, clock: C) -> Self {
        Self {
            key_field: key_field.into(),
            clock,
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Add `description` and `timestamp` to a record.
    ///
    /// `position` is the record's zero-based index in the stream and is only
    /// used to locate failures.
    pub fn enrich(&self, record: Record, position: u64) -> Result<EnrichedRecord> {
        let num = match record.get(&self.key_field) {
            Some(Value::Int(num)) => *num,
            Some(other) => {
                return Err(ExportError::transform(
                    position,
                    format!(
                        "field '{}' must be an integer, got {}",
                        self.key_field,
                        other.type_name()
                    ),
                ))
            }
            None => {
                return Err(ExportError::transform(
                    position,
                    format!("field '{}' is missing", self.key_field),
                ))
            }
        };

        Ok(EnrichedRecord {
            record,
            num,
            description: format!("Row {}", num),
            timestamp: self.clock.now().format(TIMESTAMP_FORMAT).to_string(),
        })
    }

    /// Enrich and render a record in one step.
    pub fn render(&self, record: Record, position: u64) -> Result<Chunk> {
        Ok(self.enrich(record, position)?.render())
    }
}
