//! Pipeline error types.
//!
//! Every failure inside the pipeline carries an [`ErrorKind`] so that the
//! propagation policy can be decided mechanically: transient kinds are
//! retried, per-item kinds are recorded on the document and skipped, and
//! store/fatal kinds terminate the job.

use std::fmt;

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Filesystem or archive failure.
    Io,
    /// Relational store failure.
    Store,
    /// Remote endpoint unreachable or returned a transport error.
    Network,
    /// Remote endpoint signalled rate limiting.
    RateLimit,
    /// Downstream service degraded past its retry budget.
    Unavailable,
    /// No extractor exists for this content.
    Unsupported,
    /// File content could not be decoded.
    Corrupt,
    /// LLM output not parseable or schema-invalid.
    Malformed,
    /// Too many planning items left unassigned.
    PlanningIncomplete,
    /// Plan failed referential validation.
    Validation,
    /// Two plan entries target the same path.
    Conflict,
    /// Cooperative cancellation was requested.
    Cancelled,
    /// Invariant breach; the job must stop immediately.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Store => "store",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Malformed => "malformed",
            ErrorKind::PlanningIncomplete => "planning_incomplete",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corrupt, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Unavailable
        )
    }

    /// Whether the whole job must stop rather than the current item.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ErrorKind::Store | ErrorKind::Fatal)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(ErrorKind::Store, err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Malformed, err.to_string())
    }
}

impl From<ureq::Error> for PipelineError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(429, _) => Self::new(ErrorKind::RateLimit, "rate limited"),
            ureq::Error::Status(code, _) if code >= 500 => {
                Self::new(ErrorKind::Network, format!("server returned {code}"))
            }
            ureq::Error::Status(code, _) => {
                Self::new(ErrorKind::Unavailable, format!("request rejected ({code})"))
            }
            ureq::Error::Transport(t) => Self::new(ErrorKind::Network, t.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
