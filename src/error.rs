use crate::common::AppointmentId;

/// Errors surfaced by the synchronizers and the API client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Transient; the next poll tick recovers.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rejected before reaching the network, or by the server as malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The server state moved on, e.g. an appointment was already resolved.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Appointment {0} already has a response in flight")]
    AppointmentBusy(AppointmentId),

    #[error("No conversation is open")]
    NoActiveConversation,

    /// The activation this operation belonged to was torn down while it was
    /// in flight; its result was discarded.
    #[error("Result discarded: conversation was switched or closed")]
    Superseded,
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Network(format!("malformed response: {err}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
