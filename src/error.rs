use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a session, classified by the phase that failed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0:#}")]
    Config(anyhow::Error),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("no output for {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Short phase name used in the terminal message for fatal errors.
    pub fn phase(&self) -> &'static str {
        match self {
            EngineError::Launch(_) => "launch",
            EngineError::Io(_) => "I/O",
            EngineError::Config(_) => "config",
            EngineError::Upload(_) => "upload",
            EngineError::Timeout(_) => "timeout",
        }
    }

    /// Fatal errors abort the session before or instead of the read loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Launch(_) | EngineError::Config(_))
    }
}

impl From<SupervisorError> for EngineError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::StartupFailure(msg) => EngineError::Launch(msg),
            SupervisorError::Closed => EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child input closed",
            )),
            SupervisorError::IoError(e) => EngineError::Io(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process failed to start: {0}")]
    StartupFailure(String),
    #[error("process input is closed")]
    Closed,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why a rule's action sequence stopped early.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Write(#[from] SupervisorError),
    #[error("rule actions cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("store rejected '{label}': {reason}")]
    Rejected { label: String, reason: String },
    #[error("publish of '{0}' timed out after {1:?}")]
    TimedOut(String, Duration),
    #[error("store I/O error: {0}")]
    Io(String),
}
