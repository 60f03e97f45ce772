//! Driver for 16-byte-block sector tags (MIFARE Classic)
//!
//! Memory is grouped into 4-block sectors; the last block of each sector is
//! the trailer (keys + access bits) and is never rewritten outside the
//! explicit lock operation. Sector 0 holds the manufacturer block and the
//! MIFARE Application Directory, whose entries mark which sectors carry
//! NDEF data. Every sector access needs a prior load-key + authenticate.

use nfc_agent_apdu::{CardTransport, Command};
use nfc_agent_core::ndef::EMPTY_MESSAGE_TLV;
use nfc_agent_core::{Error, NdefError, NdefMessage, Result};

use super::TagDriver;

/// Public MAD key A
pub const MAD_KEY_A: [u8; 6] = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
/// NFC Forum public sector key A
pub const NFC_KEY_A: [u8; 6] = [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7];

/// Key-type selector for the authenticate APDU
const KEY_TYPE_A: u8 = 0x60;
/// MAD entry marking an NDEF sector
const NDEF_AID: [u8; 2] = [0x03, 0xE1];
/// Data bytes per sector (three 16-byte blocks)
const SECTOR_DATA_BYTES: usize = 48;
/// Access bits + general-purpose byte for a read-only NDEF sector
const RO_ACCESS: [u8; 4] = [0x07, 0x8F, 0x0F, 0x43];

/// Extract the NDEF-claimed sector numbers from the two MAD blocks.
/// Block 1 carries the CRC, the info byte, then AIDs for sectors 1-7;
/// block 2 carries AIDs for sectors 8-15.
pub(crate) fn parse_mad(block1: &[u8; 16], block2: &[u8; 16]) -> Vec<u8> {
    let mut sectors = Vec::new();
    for (i, pair) in block1[2..].chunks_exact(2).enumerate() {
        if pair == NDEF_AID {
            sectors.push(i as u8 + 1);
        }
    }
    for (i, pair) in block2.chunks_exact(2).enumerate() {
        if pair == NDEF_AID {
            sectors.push(i as u8 + 8);
        }
    }
    sectors
}

/// The sector-family driver
#[derive(Debug, Clone, Copy)]
pub struct SectorDriver {
    mad_key: [u8; 6],
    ndef_key: [u8; 6],
}

impl Default for SectorDriver {
    fn default() -> Self {
        Self {
            mad_key: MAD_KEY_A,
            ndef_key: NFC_KEY_A,
        }
    }
}

impl SectorDriver {
    /// Driver using the public MAD and NFC Forum keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver using caller-supplied keys
    pub const fn with_keys(mad_key: [u8; 6], ndef_key: [u8; 6]) -> Self {
        Self { mad_key, ndef_key }
    }

    fn authenticate(
        &self,
        transport: &mut dyn CardTransport,
        block: u8,
        key: &[u8; 6],
    ) -> Result<()> {
        transport.exchange(&Command::load_key(key.to_vec()))?;
        transport
            .exchange(&Command::general_authenticate(block, KEY_TYPE_A))
            .map(drop)
    }

    fn read_block(&self, transport: &mut dyn CardTransport, block: u8) -> Result<[u8; 16]> {
        let payload = transport.exchange(&Command::read_binary(block, 0x10))?;
        payload
            .as_ref()
            .try_into()
            .map_err(|_| Error::parse(format!("short read at block {block}")))
    }

    fn write_block(
        &self,
        transport: &mut dyn CardTransport,
        block: u8,
        data: &[u8; 16],
    ) -> Result<()> {
        transport
            .exchange(&Command::update_binary(block, data.to_vec()))
            .map(drop)
    }

    /// Scan the MAD for sectors claimed by the NDEF application. Requires
    /// authenticating sector 0 with the MAD key.
    fn ndef_sectors(&self, transport: &mut dyn CardTransport) -> Result<Vec<u8>> {
        self.authenticate(transport, 1, &self.mad_key)?;
        let block1 = self.read_block(transport, 1)?;
        let block2 = self.read_block(transport, 2)?;
        Ok(parse_mad(&block1, &block2))
    }

    /// The three data blocks of a sector, trailer excluded.
    const fn data_blocks(sector: u8) -> [u8; 3] {
        [sector * 4, sector * 4 + 1, sector * 4 + 2]
    }

    const fn trailer_block(sector: u8) -> u8 {
        sector * 4 + 3
    }

    /// Read the concatenated data blocks of the given sectors.
    fn read_sectors(&self, transport: &mut dyn CardTransport, sectors: &[u8]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(sectors.len() * SECTOR_DATA_BYTES);
        for &sector in sectors {
            self.authenticate(transport, sector * 4, &self.ndef_key)?;
            for block in Self::data_blocks(sector) {
                data.extend_from_slice(&self.read_block(transport, block)?);
            }
        }
        Ok(data)
    }

    /// Write `data` across the data blocks of the given sectors, zero-padded
    /// to a block boundary.
    fn write_sectors(
        &self,
        transport: &mut dyn CardTransport,
        sectors: &[u8],
        data: &[u8],
    ) -> Result<()> {
        let mut padded = data.to_vec();
        while padded.len() % 16 != 0 {
            padded.push(0x00);
        }

        let mut chunks = padded.chunks_exact(16);
        'sectors: for &sector in sectors {
            self.authenticate(transport, sector * 4, &self.ndef_key)?;
            for block in Self::data_blocks(sector) {
                let Some(chunk) = chunks.next() else {
                    break 'sectors;
                };
                let block_data: [u8; 16] = chunk.try_into().expect("exact chunk");
                self.write_block(transport, block, &block_data)?;
            }
        }
        Ok(())
    }
}

impl TagDriver for SectorDriver {
    fn read_ndef(&self, transport: &mut dyn CardTransport) -> Result<Option<NdefMessage>> {
        let sectors = self.ndef_sectors(transport)?;
        if sectors.is_empty() {
            return Ok(None);
        }
        let data = self.read_sectors(transport, &sectors)?;
        match NdefMessage::decode(&data) {
            Ok(message) => Ok(Some(message)),
            Err(NdefError::Empty | NdefError::NoTlv(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_ndef(&self, transport: &mut dyn CardTransport, message: &NdefMessage) -> Result<()> {
        let sectors = self.ndef_sectors(transport)?;
        if sectors.is_empty() {
            return Err(Error::unsupported(
                "tag has no NDEF sectors in its application directory",
            ));
        }

        let encoded = message.encode();
        let capacity = sectors.len() * SECTOR_DATA_BYTES;
        if encoded.len() > capacity {
            return Err(Error::bounds(format!(
                "encoded message is {} bytes, NDEF sectors hold {capacity}",
                encoded.len()
            )));
        }

        self.write_sectors(transport, &sectors, &encoded)?;

        let readback = self.read_sectors(transport, &sectors)?;
        if readback[..encoded.len()] != encoded[..] {
            return Err(Error::verify_failed("readback differs from written data"));
        }
        Ok(())
    }

    fn erase(&self, transport: &mut dyn CardTransport) -> Result<()> {
        let sectors = self.ndef_sectors(transport)?;
        if sectors.is_empty() {
            return Ok(());
        }
        let blank = vec![0u8; sectors.len() * SECTOR_DATA_BYTES];
        let mut data = blank;
        data[..4].copy_from_slice(&EMPTY_MESSAGE_TLV);
        self.write_sectors(transport, &sectors, &data)
    }

    fn lock(&self, transport: &mut dyn CardTransport) -> Result<()> {
        let sectors = self.ndef_sectors(transport)?;
        for &sector in &sectors {
            self.authenticate(transport, sector * 4, &self.ndef_key)?;
            let mut trailer = [0u8; 16];
            trailer[..6].copy_from_slice(&self.ndef_key);
            trailer[6..10].copy_from_slice(&RO_ACCESS);
            // Key B stays zeroed: nothing can rewrite the trailer again.
            self.write_block(transport, Self::trailer_block(sector), &trailer)?;
        }
        Ok(())
    }

    fn set_password(
        &self,
        _transport: &mut dyn CardTransport,
        _password: &[u8; 4],
        _pack: &[u8; 2],
        _start_page: u8,
    ) -> Result<()> {
        Err(Error::unsupported(
            "password protection is not available on sector tags",
        ))
    }

    fn clear_password(&self, _transport: &mut dyn CardTransport, _password: &[u8; 4]) -> Result<()> {
        Err(Error::unsupported(
            "password protection is not available on sector tags",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testutil::MockCard;
    use hex_literal::hex;
    use nfc_agent_core::{ErrorKind, NdefRecord};

    const ATR_MIFARE: [u8; 20] = hex!("3b8f8001804f0ca000000306030001000000006a");
    const UID: [u8; 4] = hex!("932bae0e");

    /// A 1K tag with sectors 1 and 2 claimed for NDEF.
    fn mifare_1k() -> MockCard {
        let mut card = MockCard::new(&ATR_MIFARE, &UID, 64, 16);
        let mut mad1 = [0u8; 16];
        mad1[1] = 0x01; // info byte
        mad1[2..4].copy_from_slice(&NDEF_AID);
        mad1[4..6].copy_from_slice(&NDEF_AID);
        card.load(1, &mad1);
        card
    }

    #[test]
    fn mad_scan_finds_ndef_sectors() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        assert_eq!(driver.ndef_sectors(&mut card).unwrap(), vec![1, 2]);
    }

    #[test]
    fn mad_scan_covers_upper_sectors() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        let mut mad2 = [0u8; 16];
        mad2[14..16].copy_from_slice(&NDEF_AID); // sector 15
        card.load(2, &mad2);
        assert_eq!(driver.ndef_sectors(&mut card).unwrap(), vec![1, 2, 15]);
    }

    #[test]
    fn write_and_read_round_trip() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        let message = NdefMessage::new(vec![
            NdefRecord::uri("https://example.com"),
            NdefRecord::text("hello"),
        ])
        .unwrap();

        driver.write_ndef(&mut card, &message).unwrap();
        // Data lands in sector 1's first data block.
        assert_eq!(card.slice(4, 1)[0], 0x03);
        // The trailer block of sector 1 was never touched.
        assert_eq!(card.slice(7, 16), [0u8; 16]);

        let read = driver.read_ndef(&mut card).unwrap().unwrap();
        assert_eq!(read, message);
    }

    #[test]
    fn blank_tag_reads_none() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        assert!(driver.read_ndef(&mut card).unwrap().is_none());
    }

    #[test]
    fn tag_without_ndef_sectors_refuses_writes() {
        let driver = SectorDriver::new();
        let mut card = MockCard::new(&ATR_MIFARE, &UID, 64, 16);
        let message = NdefMessage::new(vec![NdefRecord::text("x")]).unwrap();
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn capacity_is_bounded_by_claimed_sectors() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        // Two sectors hold 96 data bytes; this encodes past that.
        let message = NdefMessage::new(vec![NdefRecord::mime(
            "application/octet-stream",
            vec![0xAB; 120],
        )])
        .unwrap();
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bounds);
    }

    #[test]
    fn wrong_key_surfaces_auth_failed() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        card.failing_auth_blocks = vec![4];
        let message = NdefMessage::new(vec![NdefRecord::text("x")]).unwrap();
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn erase_leaves_empty_tlv() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        let message = NdefMessage::new(vec![NdefRecord::text("data")]).unwrap();
        driver.write_ndef(&mut card, &message).unwrap();

        driver.erase(&mut card).unwrap();
        assert_eq!(card.slice(4, 4), EMPTY_MESSAGE_TLV);
        assert!(driver.read_ndef(&mut card).unwrap().is_none());
    }

    #[test]
    fn lock_rewrites_trailers_read_only() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        driver.lock(&mut card).unwrap();

        let trailer = card.slice(7, 16);
        assert_eq!(&trailer[..6], &NFC_KEY_A);
        assert_eq!(&trailer[6..10], &RO_ACCESS);
        assert_eq!(&trailer[10..], &[0u8; 6]); // key B zeroed
    }

    #[test]
    fn passwords_are_unsupported() {
        let driver = SectorDriver::new();
        let mut card = mifare_1k();
        assert_eq!(
            driver
                .set_password(&mut card, &[0u8; 4], &[0u8; 2], 4)
                .unwrap_err()
                .kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            driver
                .clear_password(&mut card, &[0u8; 4])
                .unwrap_err()
                .kind(),
            ErrorKind::Unsupported
        );
    }
}
