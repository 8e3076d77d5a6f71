use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error produced by the replay engine.
///
/// A distinction is made between a recoverable and unrecoverable error:
/// - Recoverable errors do not result in termination of the current run.
/// - Unrecoverable errors transition the
///   [`ReplayCoordinator`](crate::coordinator::ReplayCoordinator) to `FAILED`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum ReplayError {
    #[error("recoverable error: {0}")]
    Recoverable(#[from] RecoverableReplayError),

    #[error("unrecoverable error: {0}")]
    Unrecoverable(#[from] UnrecoverableReplayError),
}

/// Transient error conditions the coordinator can recover from without failing the run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum RecoverableReplayError {
    #[error("source error loading window [{window_start}, {window_end}): {cause}")]
    SourceWindowLoad {
        window_start: String,
        window_end: String,
        cause: String,
    },
}

/// Fatal error conditions that require the coordinator to transition to `FAILED`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum UnrecoverableReplayError {
    #[error("invalid replay params: {0}")]
    Validation(String),

    #[error("source error loading window [{window_start}, {window_end}) after retry: {cause}")]
    SourceWindowLoadRetryExhausted {
        window_start: String,
        window_end: String,
        cause: String,
    },

    #[error("preheat phase considered fatal by operator: task {task_id} failed: {cause}")]
    PreheatFatal { task_id: String, cause: String },

    #[error("broker unreachable at start: {0}")]
    BrokerUnreachable(String),

    #[error("a replay run is already active")]
    AlreadyRunning,

    #[error("no replay run is active")]
    NotRunning,

    #[error("{0}")]
    Custom(String),
}

impl ReplayError {
    /// Determine whether this error requires the coordinator to give up on the current run.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, ReplayError::Unrecoverable(_))
    }
}

/// Error surfaced by a [`DataLoader`](crate::loader::DataLoader) window fetch. Not itself a
/// [`ReplayError`] variant; the coordinator's supervision policy decides how to translate a
/// `LoadError` (retry once, then `SourceWindowLoadRetryExhausted`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
#[error("load error for window [{window_start}, {window_end}): {cause}")]
pub struct LoadError {
    pub window_start: String,
    pub window_end: String,
    pub cause: String,
}
