//! Failure shapes produced by `Runner::finish`

use super::step::Changes;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;

/// Why a step stopped the run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The step function returned `Err(reason)`
    #[error("returned error: {0}")]
    Returned(Value),

    /// The async task panicked or was cancelled before producing a result
    #[error("task exited abnormally: {0}")]
    Exited(String),

    /// The async batch did not complete within the runner's timeout
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl FailureReason {
    /// Describe a task that never handed back a result
    pub(crate) fn exited(err: JoinError) -> Self {
        if err.is_cancelled() {
            return Self::Exited("task was cancelled".into());
        }

        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".into());

        Self::Exited(format!("task panicked: {}", message))
    }

    /// The value the step function failed with, if it failed explicitly
    pub fn returned(&self) -> Option<&Value> {
        match self {
            Self::Returned(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// A halted run: the failing step, why it failed, and everything committed
/// strictly before it
#[derive(Debug, Clone, PartialEq, Error)]
#[error("step '{step}' failed: {reason}")]
pub struct RunFailure {
    pub step: String,
    pub reason: FailureReason,
    pub changes: Changes,
}

impl RunFailure {
    pub fn new(step: impl Into<String>, reason: FailureReason, changes: Changes) -> Self {
        Self {
            step: step.into(),
            reason,
            changes,
        }
    }

    /// Split into `(failed_step, reason, changes_before)`
    pub fn into_parts(self) -> (String, FailureReason, Changes) {
        (self.step, self.reason, self.changes)
    }
}
