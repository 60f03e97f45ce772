//! Pseudo-APDU types for storage-card readers
//!
//! Contactless storage cards are driven through the reader's pseudo-APDU
//! set (class `0xFF`): get-data, read/update-binary, load-key and
//! general-authenticate. This crate provides the command builder, the
//! response splitter with status-word classification, and the
//! [`CardTransport`] trait the drivers run against.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod command;
mod response;
mod status;
mod transport;

pub use command::Command;
pub use response::Response;
pub use status::StatusWord;
pub use transport::{CardTransport, Disposition, TransportError};

// Re-export bytes for convenience, as the payload type of every exchange.
pub use bytes::{Bytes, BytesMut};
