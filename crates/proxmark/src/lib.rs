//! Lab-reader executor
//!
//! Drives a single USB-tethered Proxmark3 through its text-mode client.
//! The executor keeps one long-lived `pm3` child alive in interactive mode,
//! multiplexes commands onto its stdin and frames the free-form output by
//! silence, falling back to one-shot `-c` invocation when the persistent
//! session fails. Commands are strictly serialized; the child's lifecycle
//! (lazy spawn, idle teardown, unexpected-exit detection) is owned here and
//! nowhere else.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod commands;
mod error;
mod executor;
mod parser;

pub use commands::KeyType;
pub use error::LabError;
pub use executor::{LabConfig, LabExecutor};
pub use parser::{LabCardInfo, ParsedTagKind};
