//! Card transport abstraction
//!
//! A transport owns one connection to one card and moves raw APDU bytes
//! across it. Implementations exist for PC/SC readers and for test mocks;
//! the tag drivers only ever see this trait.

use bytes::Bytes;
use nfc_agent_core::{Error, ErrorKind};

use crate::command::Command;
use crate::response::Response;

/// What to do with the card when the connection is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Leave the card as is (plain reads)
    #[default]
    Leave,
    /// Reset the card (after writes)
    Reset,
}

/// Transport-level failures, below the canonical taxonomy
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the reader or establish a context
    #[error("failed to connect to reader")]
    Connection,
    /// No card present in the reader
    #[error("no card present in reader: {0}")]
    NoCard(String),
    /// Failed to transmit data
    #[error("failed to transmit to card")]
    Transmission,
    /// Response shorter than a status word
    #[error("response truncated ({0} bytes)")]
    Truncated(usize),
    /// Operation timed out
    #[error("card operation timed out")]
    Timeout,
    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::NoCard(_) => ErrorKind::NoCard,
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::Truncated(_) => ErrorKind::Parse,
            _ => ErrorKind::Transport,
        };
        Self::new(kind, err.to_string())
    }
}

/// A connection to a single card
pub trait CardTransport {
    /// Transmit raw command bytes, returning the raw response
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// The ATR returned at card activation
    fn atr(&mut self) -> Result<Bytes, TransportError>;

    /// Transmit a command and split the response
    fn transmit(&mut self, command: &Command) -> Result<Response, TransportError> {
        let raw = self.transmit_raw(&command.to_bytes())?;
        Response::from_bytes(&raw)
    }

    /// Transmit a command, requiring a successful status word and
    /// classifying failures into the canonical taxonomy
    fn exchange(&mut self, command: &Command) -> Result<Bytes, Error> {
        self.transmit(command)?.into_result()
    }
}
