use thiserror::Error;

use crate::model::{RecordKey, SessionStatus};
use crate::remote::RemoteError;
use crate::validate::ValidationError;

/// Failure classes surfaced to the panel user. None of them is fatal:
/// remote failures degrade to the fallback snapshot, poll timeouts are
/// advisory, and a missing token sends the user to log in.
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("backend unavailable: {0}")]
    RemoteUnavailable(#[from] RemoteError),
    #[error("invalid input: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("{key} did not reach {expected} after {attempts} attempts; it may still be processing")]
    PollTimeout {
        key: RecordKey,
        expected: SessionStatus,
        attempts: u32,
    },
    #[error("not logged in")]
    AuthRequired,
}

impl PanelError {
    /// Advisory errors are shown as warnings, not failures.
    pub fn is_advisory(&self) -> bool {
        matches!(self, PanelError::RemoteUnavailable(_) | PanelError::PollTimeout { .. })
    }
}
