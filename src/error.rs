use thiserror::Error;

/// Convenience type alias for Results with [`RatchetError`]
pub type Result<T> = std::result::Result<T, RatchetError>;

/// Error taxonomy shared by every core subsystem.
///
/// Each variant maps to a named kind from the error-handling design:
/// NotFound, Conflict, Capacity, Invalid, Upstream, Transport, Protocol,
/// Timeout, Cancelled, Fatal. Components never invent ad-hoc error
/// strings; they pick the kind that matches the failure and attach
/// context.
#[derive(Error, Debug)]
pub enum RatchetError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal invariant violation: {0}")]
    Fatal(String),

    #[error("agent error: {message}")]
    Agent { message: String },

    #[error("task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("unauthorized")]
    Unauthorized,
}

impl RatchetError {
    /// Queue/inbox overflow is always a [`RatchetError::Capacity`] error.
    pub fn queue_full(what: &str) -> Self {
        RatchetError::Capacity(format!("{what} is full"))
    }

    /// HTTP status this error should surface as on the thin API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            RatchetError::NotFound(_) => 404,
            RatchetError::Conflict(_) => 409,
            RatchetError::Invalid(_) => 400,
            RatchetError::Unauthorized => 401,
            RatchetError::Capacity(_) | RatchetError::Timeout(_) => 503,
            _ => 500,
        }
    }
}
