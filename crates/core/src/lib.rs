//! Core types for the NFC agent
//!
//! This crate provides the pieces of the agent that are independent of any
//! transport or server surface:
//!
//! - The wire-level data model ([`Card`], [`Reader`])
//! - The canonical error taxonomy shared by every layer ([`ErrorKind`])
//! - The ATR classifier that maps activation bytes to a tag family
//! - The NDEF codec (TLV framing, record assembly, URI prefix compression)
//!
//! Everything here is pure: no I/O, no global state.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod atr;
pub mod ndef;

mod card;
mod error;

pub use card::{Card, Reader, ReaderKind, TagFamily, TagVariant};
pub use error::{Error, ErrorKind, Result};
pub use ndef::{NdefError, NdefMessage, NdefRecord, Tnf};
