// Durable orchestration runtime
//
// Orchestrators are async functions over an `OrchestrationContext`; every
// activity call gets a sequence number when it is issued and its output is
// written to SQLite. Re-running an orchestrator after a restart replays
// recorded outputs instead of executing activities again.

mod context;
mod instance;
mod registry;
mod runtime;

pub use context::OrchestrationContext;
pub use instance::{InstanceEvent, InstanceRecord, InstanceStore};
pub use registry::{ActivityFn, OrchestratorFn, Registry};
pub use runtime::DurableRuntime;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an orchestration instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Terminated => "Terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Running" => Some(Self::Running),
            "Completed" => Some(Self::Completed),
            "Failed" => Some(Self::Failed),
            "Terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("unknown orchestrator: {0}")]
    UnknownOrchestrator(String),
    #[error("unknown activity: {0}")]
    UnknownActivity(String),
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("instance {0} already exists and is not finished")]
    AlreadyExists(String),
    #[error("instance {id} is not running (status {status})")]
    NotRunning { id: String, status: RuntimeStatus },
    #[error("instance {0} was terminated")]
    Terminated(String),
    #[error("activity {name} failed: {message}")]
    Activity { name: String, message: String },
    #[error("history mismatch at seq {seq}: recorded {recorded}, called {called}")]
    HistoryMismatch {
        seq: u64,
        recorded: String,
        called: String,
    },
    #[error("orchestration storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("orchestration serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in [
            RuntimeStatus::Pending,
            RuntimeStatus::Running,
            RuntimeStatus::Completed,
            RuntimeStatus::Failed,
            RuntimeStatus::Terminated,
        ] {
            assert_eq!(RuntimeStatus::parse(status.as_str()), Some(status));
        }
        assert!(!RuntimeStatus::Pending.is_terminal());
        assert!(!RuntimeStatus::Running.is_terminal());
        assert!(RuntimeStatus::Failed.is_terminal());
        assert_eq!(RuntimeStatus::parse("Paused"), None);
    }
}
