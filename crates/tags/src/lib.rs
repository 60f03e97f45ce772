//! Tag drivers and the card facade
//!
//! Three drivers translate the canonical operation set (identify, read,
//! write-NDEF, erase, lock, password) onto the command sequences of their
//! tag family: 4-byte-page tags, 16-byte-block sector tags, and ISO 15693
//! block tags. The [`CardService`] facade picks a driver from the ATR
//! classification, serializes operations per physical reader, and routes
//! the lab reader's virtual slot to the subprocess executor instead of
//! PC/SC.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod driver;

mod facade;
mod lab;
mod readers;

pub use facade::{CardService, DataType};
pub use readers::{is_lab_reader, list_readers, LAB_READER_ID, LAB_READER_NAME};
