//! Pipeline lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one pipeline run.
///
/// ```text
/// IDLE -> ACQUIRING -> STREAMING -> DRAINING -> COMPLETED | CANCELLED
///             |            |           |
///             +------------+-----------+------> FAILED
/// ```
///
/// A cancel observed while acquiring goes straight to DRAINING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Acquiring,
    Streaming,
    Draining,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Acquiring)
                | (Acquiring, Streaming)
                | (Acquiring, Draining)
                | (Acquiring, Failed)
                | (Streaming, Draining)
                | (Streaming, Failed)
                | (Draining, Completed)
                | (Draining, Cancelled)
                | (Draining, Failed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Acquiring => "ACQUIRING",
            PipelineState::Streaming => "STREAMING",
            PipelineState::Draining => "DRAINING",
            PipelineState::Completed => "COMPLETED",
            PipelineState::Failed => "FAILED",
            PipelineState::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}
