//! Apply Orchestrator
//!
//! Pushes a new configuration live as a transaction:
//! backup → write → validate → {commit | rollback} → restart → {done | rollback}.
//! The live file is always either the previously committed config or the
//! newly validated one when control returns to the caller.

mod capabilities;
mod orchestrator;

use std::fmt;

use serde::Serialize;

pub use capabilities::{
    CheckReport, ConfigValidator, HaproxyValidator, ServiceController, SystemctlController,
};
pub use orchestrator::{ApplyOrchestrator, OrchestratorConfig};

use crate::backup::BackupMeta;
use crate::error::{Error, ErrorKind};

/// Progress of an apply or restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    /// Nothing in flight, or the attempt ended before the live file changed
    Idle,
    /// Snapshotting the live config
    BackingUp,
    /// Writing the candidate config
    Writing,
    /// Running the external validator
    Validating,
    /// Candidate accepted by the validator
    Committed,
    /// Candidate rejected and the previous config put back
    RolledBack,
    /// Restarting the service
    Restarting,
    /// Applied and restarted
    Done,
    /// Restart failed and the previous config put back
    RestartFailedRolledBack,
    /// Putting the previous config back failed
    RollbackFailed,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyState::Idle => "idle",
            ApplyState::BackingUp => "backing_up",
            ApplyState::Writing => "writing",
            ApplyState::Validating => "validating",
            ApplyState::Committed => "committed",
            ApplyState::RolledBack => "rolled_back",
            ApplyState::Restarting => "restarting",
            ApplyState::Done => "done",
            ApplyState::RestartFailedRolledBack => "restart_failed_rolled_back",
            ApplyState::RollbackFailed => "rollback_failed",
        };
        write!(f, "{}", s)
    }
}

/// Structured error detail for callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ApplyError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of an apply, restore or reload
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub success: bool,
    /// State the attempt finished in
    pub state: ApplyState,
    pub error: Option<ApplyError>,
    /// Backup taken before the live file was touched
    pub backup: Option<BackupMeta>,
    pub message: String,
    pub warnings: Vec<String>,
}

impl ApplyResult {
    pub(crate) fn success(
        state: ApplyState,
        backup: Option<BackupMeta>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            state,
            error: None,
            backup,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn failure(state: ApplyState, err: &Error, backup: Option<BackupMeta>) -> Self {
        Self {
            success: false,
            state,
            error: Some(ApplyError::from(err)),
            backup,
            message: err.to_string(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Error category, if the attempt failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
