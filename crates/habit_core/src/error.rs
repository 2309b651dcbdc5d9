use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures raised by a single notification backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend cannot run here: wrong platform or module not installed.
    #[error("notification backend `{backend}` is unavailable")]
    Unavailable { backend: &'static str },
    #[error("notification backend `{backend}` call failed: {reason}")]
    CallFailed {
        backend: &'static str,
        reason: String,
    },
}

impl BackendError {
    pub fn call_failed(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::CallFailed {
            backend,
            reason: reason.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Error reported by a platform notification API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for key `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stored value for key `{key}` is not valid JSON: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced at the scheduler and task lifecycle boundary.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("notification permission has not been granted")]
    PermissionDenied,
    #[error("alarm time {fire_at} is not in the future (now {now})")]
    InvalidTime {
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error(transparent)]
    BackendUnavailable(BackendError),
    #[error("every notification backend failed: {0}")]
    BackendCallFailed(BackendError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("task `{0}` not found")]
    TaskNotFound(String),
    #[error("task `{0}` is completed and cannot hold an alarm")]
    TaskCompleted(String),
}

impl AlarmError {
    /// Alert text naming the likely cause, for callers that surface the failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Failed to set alarm. Please allow notifications for this app."
            }
            Self::InvalidTime { .. } => {
                "Failed to set alarm. Please choose an alarm time in the future."
            }
            Self::BackendUnavailable(_) | Self::BackendCallFailed(_) => {
                "Failed to set alarm. Please check notification permissions and ensure the alarm time is in the future."
            }
            Self::Storage(_) => "Failed to save your tasks.",
            Self::TaskNotFound(_) => "Task not found.",
            Self::TaskCompleted(_) => "Completed tasks cannot have an alarm.",
        }
    }
}

impl From<BackendError> for AlarmError {
    fn from(err: BackendError) -> Self {
        if err.is_unavailable() {
            Self::BackendUnavailable(err)
        } else {
            Self::BackendCallFailed(err)
        }
    }
}

pub type Result<T, E = AlarmError> = std::result::Result<T, E>;
