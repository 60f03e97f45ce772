//! Tag family drivers
//!
//! Each driver implements the same canonical operation set against a
//! [`CardTransport`]; the operation sets overlap only at that level, so
//! there is no shared base — just the trait.

use nfc_agent_apdu::CardTransport;
use nfc_agent_core::{NdefMessage, Result};

mod block;
mod page;
mod sector;

pub use block::BlockDriver;
pub use page::{PageDriver, PageGeometry, PageProbe};
pub use sector::{SectorDriver, MAD_KEY_A, NFC_KEY_A};

pub(crate) use sector::parse_mad;

/// The canonical operations every family supports (or explicitly refuses)
pub trait TagDriver {
    /// Read and decode the stored NDEF message, `None` when the tag holds
    /// no message
    fn read_ndef(&self, transport: &mut dyn CardTransport) -> Result<Option<NdefMessage>>;

    /// Encode and write a message, verifying capacity first
    fn write_ndef(&self, transport: &mut dyn CardTransport, message: &NdefMessage) -> Result<()>;

    /// Replace the stored message with an empty TLV and zero the rest of
    /// user memory
    fn erase(&self, transport: &mut dyn CardTransport) -> Result<()>;

    /// Make the tag permanently read-only
    fn lock(&self, transport: &mut dyn CardTransport) -> Result<()>;

    /// Install password protection
    fn set_password(
        &self,
        transport: &mut dyn CardTransport,
        password: &[u8; 4],
        pack: &[u8; 2],
        start_page: u8,
    ) -> Result<()>;

    /// Remove password protection, authenticating with the current password
    fn clear_password(&self, transport: &mut dyn CardTransport, password: &[u8; 4]) -> Result<()>;
}

/// Size of the full NDEF TLV region (leading NULL TLVs, header, value and
/// terminator) given the first bytes of user memory, or `None` when no
/// message TLV starts there.
pub(crate) fn ndef_region_len(head: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos < head.len() && head[pos] == 0x00 {
        pos += 1;
    }
    if *head.get(pos)? != 0x03 {
        return None;
    }
    let len_off = pos + 1;
    let (value_len, header_len) = match *head.get(len_off)? {
        0xFF => {
            let hi = *head.get(len_off + 1)? as usize;
            let lo = *head.get(len_off + 2)? as usize;
            ((hi << 8) | lo, 4)
        }
        short => (short as usize, 2),
    };
    Some(pos + header_len + value_len + 1)
}
