//! APDU command construction
//!
//! Storage-card traffic only ever uses the short form: a four-byte header,
//! an optional Lc-prefixed data field and an optional single-byte Le.

use bytes::{BufMut, Bytes, BytesMut};

/// Reader pseudo-APDU class byte
const CLA_PSEUDO: u8 = 0xFF;

/// A short-form APDU command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected response length (optional)
    pub le: Option<u8>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// `FF CA 00 00 00` — get the card UID
    pub const fn get_uid() -> Self {
        Self::new(CLA_PSEUDO, 0xCA, 0x00, 0x00).with_le(0x00)
    }

    /// `FF B0 00 p n` — read `n` bytes starting at page/block `p`
    pub const fn read_binary(address: u8, length: u8) -> Self {
        Self::new(CLA_PSEUDO, 0xB0, 0x00, address).with_le(length)
    }

    /// `FF D6 00 p |D| D` — write `data` at page/block `p`
    pub fn update_binary<T: Into<Bytes>>(address: u8, data: T) -> Self {
        Self::new(CLA_PSEUDO, 0xD6, 0x00, address).with_data(data)
    }

    /// `FF 82 00 00 06 K` — load a six-byte key into volatile slot 0
    pub fn load_key<T: Into<Bytes>>(key: T) -> Self {
        Self::new(CLA_PSEUDO, 0x82, 0x00, 0x00).with_data(key)
    }

    /// `FF 86 00 00 05 01 00 b T 00` — authenticate the sector holding
    /// block `b` with the loaded key of type `T` (0x60 = A, 0x61 = B)
    pub fn general_authenticate(block: u8, key_type: u8) -> Self {
        Self::new(CLA_PSEUDO, 0x86, 0x00, 0x00)
            .with_data(Bytes::copy_from_slice(&[0x01, 0x00, block, key_type, 0x00]))
    }

    /// `FF 00 00 00 Lc <payload>` — pass `payload` straight to the card
    /// through the reader's direct-transmit envelope
    pub fn direct_transmit<T: Into<Bytes>>(payload: T) -> Self {
        Self::new(CLA_PSEUDO, 0x00, 0x00, 0x00).with_data(payload)
    }

    /// Serialize to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());

        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if let Some(data) = &self.data {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }
        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Length of the serialized command
    pub fn encoded_len(&self) -> usize {
        let mut length = 4;
        if let Some(data) = &self.data {
            length += 1 + data.len();
        }
        if self.le.is_some() {
            length += 1;
        }
        length
    }
}
