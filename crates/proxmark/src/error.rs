//! Lab-reader error types

use nfc_agent_core::{Error, ErrorKind};

/// Failures from the lab-reader executor
#[derive(Debug, Clone, thiserror::Error)]
pub enum LabError {
    /// No card present on the reader
    #[error("no card present")]
    NoCard,

    /// The device is not connected or not responding
    #[error("lab reader not connected")]
    NotConnected,

    /// MIFARE authentication failed (wrong key)
    #[error("authentication failed")]
    AuthFailed,

    /// A command exceeded its budget
    #[error("command timed out: {0}")]
    Timeout(String),

    /// The client binary was not found
    #[error("pm3 binary not found")]
    BinaryNotFound,

    /// Output could not be parsed
    #[error("failed to parse output: {0}")]
    Parse(String),

    /// A write command completed without a success token
    #[error("write operation failed: {0}")]
    WriteFailed(String),

    /// The child process could not be spawned or died during startup
    #[error("failed to start pm3: {0}")]
    Spawn(String),

    /// The output stream closed mid-command
    #[error("pm3 output stream closed: {0}")]
    Stream(String),

    /// A caller passed malformed arguments to a typed operation
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl From<LabError> for Error {
    fn from(err: LabError) -> Self {
        let kind = match &err {
            LabError::NoCard => ErrorKind::NoCard,
            LabError::AuthFailed => ErrorKind::AuthFailed,
            LabError::Timeout(_) => ErrorKind::Timeout,
            LabError::Parse(_) => ErrorKind::Parse,
            LabError::WriteFailed(_) => ErrorKind::VerifyFailed,
            LabError::InvalidArgument(_) => ErrorKind::Internal,
            LabError::NotConnected
            | LabError::BinaryNotFound
            | LabError::Spawn(_)
            | LabError::Stream(_) => ErrorKind::Transport,
        };
        Self::new(kind, err.to_string())
    }
}
