//! Driver for ISO 15693 block tags (ICODE SLIX family)
//!
//! Memory is addressed in 4-byte blocks through the reader's vendor
//! pseudo-APDUs; the NDEF TLV starts at block 0. SLIX tags can be put in a
//! password-locked state by other tooling — reads must leave that state
//! untouched and writes surface it as an authentication failure.

use nfc_agent_apdu::{CardTransport, Command};
use nfc_agent_core::ndef::EMPTY_MESSAGE_TLV;
use nfc_agent_core::{Error, ErrorKind, NdefError, NdefMessage, Result, TagVariant};

use super::TagDriver;

/// The block-family driver
#[derive(Debug, Clone, Copy)]
pub struct BlockDriver {
    block_count: u8,
    capacity: usize,
}

impl BlockDriver {
    /// Create a driver for the given variant
    pub const fn new(variant: TagVariant) -> Self {
        let block_count: u8 = match variant {
            TagVariant::Slix2 => 79,
            _ => 28,
        };
        Self {
            block_count,
            capacity: block_count as usize * 4,
        }
    }

    fn read_block(&self, transport: &mut dyn CardTransport, block: u8) -> Result<[u8; 4]> {
        if block >= self.block_count {
            return Err(Error::bounds(format!("block {block} out of range")));
        }
        let payload = transport.exchange(&Command::read_binary(block, 4))?;
        payload
            .as_ref()
            .try_into()
            .map_err(|_| Error::parse(format!("short read at block {block}")))
    }

    fn write_block(&self, transport: &mut dyn CardTransport, block: u8, data: [u8; 4]) -> Result<()> {
        if block >= self.block_count {
            return Err(Error::bounds(format!("block {block} out of range")));
        }
        transport
            .exchange(&Command::update_binary(block, data.to_vec()))
            .map(drop)
            .map_err(|e| {
                if e.kind() == ErrorKind::AuthFailed {
                    // Password-locked SLIX state; the driver never clears it.
                    Error::auth_failed("auth-required: tag is password-locked")
                } else {
                    e
                }
            })
    }

    fn read_region(&self, transport: &mut dyn CardTransport, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        let mut block = 0u8;
        while data.len() < len {
            data.extend_from_slice(&self.read_block(transport, block)?);
            block += 1;
        }
        data.truncate(len);
        Ok(data)
    }
}

impl TagDriver for BlockDriver {
    fn read_ndef(&self, transport: &mut dyn CardTransport) -> Result<Option<NdefMessage>> {
        let head = self.read_region(transport, 16)?;
        let Some(total) = super::ndef_region_len(&head) else {
            return Ok(None);
        };
        if total > self.capacity {
            return Err(Error::parse(format!(
                "TLV length {total} exceeds tag capacity {}",
                self.capacity
            )));
        }

        let buf = if total <= head.len() {
            head
        } else {
            self.read_region(transport, total)?
        };

        match NdefMessage::decode(&buf) {
            Ok(message) => Ok(Some(message)),
            Err(NdefError::Empty) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_ndef(&self, transport: &mut dyn CardTransport, message: &NdefMessage) -> Result<()> {
        let encoded = message.encode();
        if encoded.len() > self.capacity {
            return Err(Error::bounds(format!(
                "encoded message is {} bytes, capacity is {}",
                encoded.len(),
                self.capacity
            )));
        }

        let mut padded = encoded.to_vec();
        while padded.len() % 4 != 0 {
            padded.push(0x00);
        }
        for (i, chunk) in padded.chunks_exact(4).enumerate() {
            self.write_block(
                transport,
                i as u8,
                [chunk[0], chunk[1], chunk[2], chunk[3]],
            )?;
        }

        let readback = self.read_region(transport, encoded.len())?;
        if readback != encoded.as_ref() {
            return Err(Error::verify_failed("readback differs from written data"));
        }
        Ok(())
    }

    fn erase(&self, transport: &mut dyn CardTransport) -> Result<()> {
        self.write_block(transport, 0, EMPTY_MESSAGE_TLV)?;
        for block in 1..self.block_count {
            self.write_block(transport, block, [0u8; 4])?;
        }
        Ok(())
    }

    fn lock(&self, _transport: &mut dyn CardTransport) -> Result<()> {
        Err(Error::unsupported(
            "permanent locking is not available on ISO 15693 tags",
        ))
    }

    fn set_password(
        &self,
        _transport: &mut dyn CardTransport,
        _password: &[u8; 4],
        _pack: &[u8; 2],
        _start_page: u8,
    ) -> Result<()> {
        Err(Error::unsupported(
            "password protection is managed outside the agent on ISO 15693 tags",
        ))
    }

    fn clear_password(&self, _transport: &mut dyn CardTransport, _password: &[u8; 4]) -> Result<()> {
        Err(Error::unsupported(
            "password protection is managed outside the agent on ISO 15693 tags",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testutil::MockCard;
    use hex_literal::hex;
    use nfc_agent_core::NdefRecord;

    const ATR_ISO15693: [u8; 20] = hex!("3b8f8001804f0ca0000003060b00140000000077");
    const UID: [u8; 8] = hex!("80391566080104e0");

    fn slix() -> MockCard {
        MockCard::new(&ATR_ISO15693, &UID, 28, 4)
    }

    #[test]
    fn write_and_read_round_trip() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        let message = NdefMessage::new(vec![NdefRecord::text("eyoooo")]).unwrap();

        driver.write_ndef(&mut card, &message).unwrap();
        // The TLV starts at block 0.
        assert_eq!(card.slice(0, 1)[0], 0x03);

        let read = driver.read_ndef(&mut card).unwrap().unwrap();
        assert_eq!(read.records()[0].text_content().unwrap(), "eyoooo");
    }

    #[test]
    fn blank_tag_reads_none() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        assert!(driver.read_ndef(&mut card).unwrap().is_none());
    }

    #[test]
    fn capacity_by_variant() {
        assert_eq!(BlockDriver::new(TagVariant::Slix).capacity, 112);
        assert_eq!(BlockDriver::new(TagVariant::Slix2).capacity, 316);
    }

    #[test]
    fn oversized_message_is_refused() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        let message = NdefMessage::new(vec![NdefRecord::mime(
            "application/octet-stream",
            vec![0xAB; 150],
        )])
        .unwrap();
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bounds);
    }

    #[test]
    fn password_locked_write_reports_auth_required() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        card.write_locked = true;
        let message = NdefMessage::new(vec![NdefRecord::text("x")]).unwrap();
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
        assert!(err.message().contains("auth-required"));
    }

    #[test]
    fn locked_tag_still_reads() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        let message = NdefMessage::new(vec![NdefRecord::text("kept")]).unwrap();
        driver.write_ndef(&mut card, &message).unwrap();

        card.write_locked = true;
        let read = driver.read_ndef(&mut card).unwrap().unwrap();
        assert_eq!(read.records()[0].text_content().unwrap(), "kept");
    }

    #[test]
    fn erase_clears_every_block() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        let message = NdefMessage::new(vec![NdefRecord::text("data")]).unwrap();
        driver.write_ndef(&mut card, &message).unwrap();

        driver.erase(&mut card).unwrap();
        assert_eq!(card.slice(0, 4), EMPTY_MESSAGE_TLV);
        for block in 1..28usize {
            assert_eq!(card.slice(block, 4), [0u8; 4]);
        }
    }

    #[test]
    fn lock_and_passwords_unsupported() {
        let driver = BlockDriver::new(TagVariant::Slix);
        let mut card = slix();
        assert_eq!(
            driver.lock(&mut card).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            driver
                .set_password(&mut card, &[0u8; 4], &[0u8; 2], 0)
                .unwrap_err()
                .kind(),
            ErrorKind::Unsupported
        );
    }
}
