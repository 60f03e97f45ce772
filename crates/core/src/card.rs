//! Reader and card snapshot model
//!
//! These types are produced transiently per operation and serialized onto
//! both API surfaces; nothing here is persisted.

use serde::{Deserialize, Serialize};

use crate::ndef::NdefMessage;

/// The tag families the agent can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagFamily {
    /// ISO 14443-3 Type-2 page-addressable tags (NTAG21x)
    NtagPage,
    /// ISO 14443-3 Type-A sector-addressable tags
    MifareClassic,
    /// ISO 15693 block-addressable tags
    Iso15693,
    /// Family could not be determined; writes are refused
    Unknown,
}

/// Capacity variants within a family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagVariant {
    /// NTAG213, 144 usable bytes
    Ntag213,
    /// NTAG215, 496 usable bytes
    Ntag215,
    /// NTAG216, 872 usable bytes
    Ntag216,
    /// MIFARE Classic 1K
    Mfc1k,
    /// MIFARE Classic 4K
    Mfc4k,
    /// ICODE SLIX
    Slix,
    /// ICODE SLIX2
    Slix2,
    /// Variant could not be determined
    Unknown,
}

impl TagVariant {
    /// Usable NDEF capacity in bytes, zero when unknown
    pub const fn capacity_bytes(&self) -> usize {
        match self {
            Self::Ntag213 => 144,
            Self::Ntag215 => 496,
            Self::Ntag216 => 872,
            Self::Mfc1k => 716,
            Self::Mfc4k => 3356,
            Self::Slix => 112,
            Self::Slix2 => 316,
            Self::Unknown => 0,
        }
    }
}

/// Snapshot of a card as observed during a single operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Card UID as a lowercase hex string
    pub uid: String,
    /// Raw ATR as a lowercase hex string
    pub atr: String,
    /// Detected tag family
    pub family: TagFamily,
    /// Detected capacity variant
    pub variant: TagVariant,
    /// Usable capacity in bytes
    pub capacity_bytes: usize,
    /// Whether the agent will accept writes for this card
    pub writable: bool,
    /// Decoded NDEF message, when one was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndef: Option<NdefMessage>,
    /// Raw payload of the first record as hex, when not text or URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_payload: Option<String>,
    /// Text content of the first text record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_text: Option<String>,
    /// Reassembled URI of the first URI record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Card {
    /// A snapshot with identity fields only, before any content read
    pub fn bare(uid: String, atr: String, family: TagFamily, variant: TagVariant) -> Self {
        Self {
            uid,
            atr,
            family,
            variant,
            capacity_bytes: variant.capacity_bytes(),
            writable: !matches!(family, TagFamily::Unknown),
            ndef: None,
            plain_payload: None,
            plain_text: None,
            uri: None,
        }
    }
}

/// Reader classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderKind {
    /// A PC/SC-attached contactless reader
    Picc,
    /// The USB-tethered lab reader's single virtual slot
    Lab,
}

/// A single reader as returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reader {
    /// Stable short alias assigned in enumeration order, e.g. `reader-0`
    pub id: String,
    /// Display name; the key used throughout the card path
    pub name: String,
    /// Reader class
    pub kind: ReaderKind,
}
