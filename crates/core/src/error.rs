//! Canonical error taxonomy for card operations
//!
//! Every layer (drivers, executors, transports, request handlers) reports
//! failures through this type so that callers can distinguish the failure
//! class without string matching. The kind tokens are part of the client
//! API: error bodies carry them verbatim.

use serde::{Deserialize, Serialize};

/// Result type used across the agent crates
pub type Result<T> = std::result::Result<T, Error>;

/// The canonical failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// PC/SC context or connection failure, child-spawn failure, listener I/O
    Transport,
    /// The reader was reached but no card is present
    NoCard,
    /// Wrong key, wrong password, or a locked sector
    AuthFailed,
    /// Page or block out of range for the detected variant
    Bounds,
    /// A write reported success but the readback disagrees
    VerifyFailed,
    /// Malformed NDEF, TLV, APDU response or lab-reader output
    Parse,
    /// Operation not valid for the detected tag family
    Unsupported,
    /// Client-supplied payload violated the schema
    Validation,
    /// A deadline was exceeded
    Timeout,
    /// Invariant violation; should not happen in production
    Internal,
}

impl ErrorKind {
    /// The canonical token for this kind, as used in error bodies
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::NoCard => "no-card",
            Self::AuthFailed => "auth-failed",
            Self::Bounds => "bounds",
            Self::VerifyFailed => "verify-failed",
            Self::Parse => "parse",
            Self::Unsupported => "unsupported",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with its canonical kind and a human-readable message
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Create an error of the given kind
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The failure class
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message (no stack traces, safe for clients)
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transport-layer failure
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// No card present on the reader
    pub fn no_card<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::NoCard, message)
    }

    /// Authentication failure
    pub fn auth_failed<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::AuthFailed, message)
    }

    /// Address out of range for the detected variant
    pub fn bounds<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Bounds, message)
    }

    /// Readback after a successful write disagreed
    pub fn verify_failed<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::VerifyFailed, message)
    }

    /// Parse failure
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// Operation not supported for this tag family
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Client payload validation failure
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Deadline exceeded
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Invariant violation
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tokens_are_canonical() {
        assert_eq!(ErrorKind::NoCard.as_str(), "no-card");
        assert_eq!(ErrorKind::AuthFailed.as_str(), "auth-failed");
        assert_eq!(ErrorKind::VerifyFailed.as_str(), "verify-failed");
        assert_eq!(ErrorKind::Transport.as_str(), "transport");
    }

    #[test]
    fn kind_serializes_as_token() {
        let json = serde_json::to_string(&ErrorKind::NoCard).unwrap();
        assert_eq!(json, "\"no-card\"");
    }

    #[test]
    fn error_carries_kind_and_message() {
        let err = Error::bounds("page 240 out of range");
        assert_eq!(err.kind(), ErrorKind::Bounds);
        assert_eq!(err.to_string(), "page 240 out of range");
    }
}
