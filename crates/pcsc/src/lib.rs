//! PC/SC transport implementation
//!
//! Implements the agent's [`CardTransport`] trait on top of the platform's
//! PC/SC resource manager. A context is established per operation and every
//! connection is released with an explicit disposition, so no PC/SC handle
//! outlives the operation that created it.
//!
//! [`CardTransport`]: nfc_agent_apdu::CardTransport
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod error;
mod manager;
mod transport;

pub use error::PcscError;
pub use manager::PcscManager;
pub use transport::PcscTransport;
