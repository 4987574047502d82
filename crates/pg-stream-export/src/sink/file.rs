//! File sink with a high-water-mark buffer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::core::{Chunk, Readiness, RecordSink};
use crate::error::{ExportError, Result};

/// Suffix of the marker file written next to an incomplete output.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Marker contents while a run is still writing.
const RUNNING_REASON: &str = "running";

/// Writes chunks to a local file.
///
/// Chunks accumulate in memory until the buffer reaches `high_water_mark`
/// bytes, at which point [`write`](RecordSink::write) reports
/// [`Readiness::Pending`] and [`ready`](RecordSink::ready) drains the buffer
/// to disk.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    buffer: Vec<u8>,
    high_water_mark: usize,
    bytes_written: u64,
}

impl FileSink {
    /// Create or truncate the output file. The incomplete marker is written
    /// first and stays until [`mark_complete`](RecordSink::mark_complete).
    pub async fn create(path: impl AsRef<Path>, high_water_mark: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ExportError::sink(&shown, e))?;
            }
        }

        // Present from before truncation until a completed run removes it.
        tokio::fs::write(marker_path(&path), format!("{}\n", RUNNING_REASON))
            .await
            .map_err(|e| ExportError::sink(&shown, e))?;

        let file = File::create(&path)
            .await
            .map_err(|e| ExportError::sink(&shown, e))?;

        let high_water_mark = high_water_mark.max(1);
        Ok(Self {
            path,
            file: Some(file),
            buffer: Vec::with_capacity(high_water_mark),
            high_water_mark,
            bytes_written: 0,
        })
    }

    /// Bytes that reached the file so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Bytes accepted but not yet written to the file.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Path of the `.incomplete` marker beside the output.
    pub fn marker_path(&self) -> PathBuf {
        marker_path(&self.path)
    }

    fn error(&self, source: std::io::Error) -> ExportError {
        ExportError::sink(self.path.display().to_string(), source)
    }

    async fn drain(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let Some(file) = self.file.as_mut() else {
            return Err(self.error(closed_error()));
        };
        if let Err(e) = file.write_all(&self.buffer).await {
            return Err(self.error(e));
        }
        self.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn write(&mut self, chunk: Chunk) -> Result<Readiness> {
        if self.file.is_none() {
            return Err(self.error(closed_error()));
        }
        self.buffer.extend_from_slice(chunk.as_bytes());
        if self.buffer.len() >= self.high_water_mark {
            Ok(Readiness::Pending)
        } else {
            Ok(Readiness::Ready)
        }
    }

    async fn ready(&mut self) -> Result<()> {
        self.drain().await
    }

    async fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let drained = self.drain().await;
        // The descriptor is released whether or not the final flush succeeds.
        let Some(mut file) = self.file.take() else {
            return drained;
        };
        self.buffer.clear();
        drained?;

        file.flush().await.map_err(|e| self.error(e))?;
        debug!(
            "{}: closed after {} bytes",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }

    async fn mark_incomplete(&mut self, reason: &str) -> Result<()> {
        let marker = self.marker_path();
        warn!(
            "{}: output is incomplete ({}), marker written to {}",
            self.path.display(),
            reason,
            marker.display()
        );
        tokio::fs::write(&marker, format!("{}\n", reason))
            .await
            .map_err(|e| self.error(e))
    }

    async fn mark_complete(&mut self) -> Result<()> {
        match tokio::fs::remove_file(self.marker_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn marker_path(path: &Path) -> PathBuf {
    let mut marker = path.as_os_str().to_owned();
    marker.push(INCOMPLETE_SUFFIX);
    PathBuf::from(marker)
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sink is closed")
}
