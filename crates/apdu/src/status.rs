//! Status word interpretation
//!
//! The two trailing bytes of every response classify the outcome. The
//! mapping into the canonical error taxonomy is fixed: `63 00` is an
//! authentication failure, `6A 82` and `6A 86` are addressing errors, and
//! any other non-success word is surfaced as a transport-level I/O failure.

use std::fmt;

use nfc_agent_core::ErrorKind;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Success (90 00)
    pub const SUCCESS: Self = Self::new(0x90, 0x00);
    /// Authentication failed (63 00)
    pub const AUTH_FAILED: Self = Self::new(0x63, 0x00);
    /// Address not found (6A 82)
    pub const NOT_FOUND: Self = Self::new(0x6A, 0x82);
    /// Incorrect parameters P1-P2 (6A 86)
    pub const INCORRECT_P1P2: Self = Self::new(0x6A, 0x86);

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// The canonical failure class for this word, `None` on success
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => None,
            (0x63, 0x00) => Some(ErrorKind::AuthFailed),
            (0x6A, 0x82) | (0x6A, 0x86) => Some(ErrorKind::Bounds),
            _ => Some(ErrorKind::Transport),
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "success",
            (0x63, 0x00) => "authentication failed",
            (0x65, 0x81) => "memory failure",
            (0x67, 0x00) => "wrong length",
            (0x69, 0x82) => "security status not satisfied",
            (0x69, 0x86) => "command not allowed",
            (0x6A, 0x81) => "function not supported",
            (0x6A, 0x82) => "address not found",
            (0x6A, 0x86) => "incorrect parameters P1-P2",
            (0x6D, 0x00) => "instruction not supported",
            _ => "unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}
