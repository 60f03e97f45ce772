//! APDU response handling

use bytes::Bytes;
use nfc_agent_core::{Error, ErrorKind};

use crate::status::StatusWord;
use crate::transport::TransportError;

/// A response split into payload and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
    status: StatusWord,
}

impl Response {
    /// Create a response from payload and status
    pub const fn new(payload: Bytes, status: StatusWord) -> Self {
        Self { payload, status }
    }

    /// Split raw response bytes into payload and trailing status word
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < 2 {
            return Err(TransportError::Truncated(bytes.len()));
        }
        let (payload, sw) = bytes.split_at(bytes.len() - 2);
        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status: StatusWord::new(sw[0], sw[1]),
        })
    }

    /// The response payload, without the status word
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// True when the status word is `90 00`
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Convert into the payload, classifying any failure status into the
    /// canonical taxonomy
    pub fn into_result(self) -> Result<Bytes, Error> {
        match self.status.error_kind() {
            None => Ok(self.payload),
            Some(ErrorKind::Transport) => Err(Error::transport(format!(
                "card returned {} ({})",
                self.status,
                self.status.description()
            ))),
            Some(kind) => Err(Error::new(kind, self.status.description())),
        }
    }
}
