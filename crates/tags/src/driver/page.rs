//! Driver for 4-byte-page tags (NTAG21x family)
//!
//! Memory map, per variant: pages 0-2 hold the UID and static lock bytes,
//! page 3 the capability container, user memory starts at page 4. The
//! configuration block (AUTH0, ACCESS, PWD, PACK) sits after user memory;
//! the larger variants also carry dynamic lock bytes there.

use bytes::BytesMut;
use nfc_agent_apdu::{CardTransport, Command};
use nfc_agent_core::atr::refine_page_variant;
use nfc_agent_core::ndef::EMPTY_MESSAGE_TLV;
use nfc_agent_core::{Error, NdefMessage, Result, TagVariant};

use super::TagDriver;

/// Capability container page
const CC_PAGE: u8 = 3;
/// CC magic byte
const CC_MAGIC: u8 = 0xE1;
/// First user-memory page on every variant
const USER_START: u8 = 4;
/// Static lock bytes live in page 2, bytes 2-3
const STATIC_LOCK_PAGE: u8 = 2;
/// Largest read the pseudo-APDU path issues at once
const READ_CHUNK: usize = 60;
/// PWD_AUTH command byte, carried via direct transmit
const PWD_AUTH: u8 = 0x1B;
/// AUTH0 value that disables protection
const AUTH0_OFF: u8 = 0xFF;

/// Fixed addresses for one variant
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    /// Last user-memory page, inclusive
    pub user_end: u8,
    /// Dynamic lock page; only the variants with more than 64 pages
    pub dynamic_lock: Option<u8>,
    /// Configuration page carrying AUTH0 in byte 3
    pub cfg: u8,
    /// ACCESS configuration page
    pub access: u8,
    /// PWD page
    pub pwd: u8,
    /// PACK page
    pub pack: u8,
    /// Advertised NDEF capacity in bytes
    pub capacity: usize,
}

impl PageGeometry {
    /// The geometry for a page-family variant. Unknown variants get the
    /// smallest geometry, which is safe for reads; writes are refused
    /// upstream for tags that did not classify.
    pub const fn for_variant(variant: TagVariant) -> Self {
        match variant {
            TagVariant::Ntag215 => Self {
                user_end: 0x81,
                dynamic_lock: Some(0x82),
                cfg: 0x83,
                access: 0x84,
                pwd: 0x85,
                pack: 0x86,
                capacity: 496,
            },
            TagVariant::Ntag216 => Self {
                user_end: 0xE1,
                dynamic_lock: Some(0xE2),
                cfg: 0xE3,
                access: 0xE4,
                pwd: 0xE5,
                pack: 0xE6,
                capacity: 872,
            },
            _ => Self {
                user_end: 0x27,
                dynamic_lock: None,
                cfg: 0x29,
                access: 0x2A,
                pwd: 0x2B,
                pack: 0x2C,
                capacity: 144,
            },
        }
    }
}

/// Result of reading the capability container
#[derive(Debug, Clone, Copy)]
pub struct PageProbe {
    /// Variant refined from the CC size indicator
    pub variant: TagVariant,
    /// Whether the size indicator matched a known value exactly
    pub strict: bool,
    /// Whether the CC was present and valid; without it the tag is treated
    /// as raw memory (reads allowed, writes refused)
    pub cc_valid: bool,
}

/// The page-family driver
#[derive(Debug, Clone, Copy)]
pub struct PageDriver {
    geometry: PageGeometry,
}

impl PageDriver {
    /// Create a driver for the given variant
    pub const fn new(variant: TagVariant) -> Self {
        Self {
            geometry: PageGeometry::for_variant(variant),
        }
    }

    /// The variant geometry in use
    pub const fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Read the capability container and refine the variant from its size
    /// indicator.
    pub fn probe(transport: &mut dyn CardTransport) -> Result<PageProbe> {
        let cc = transport.exchange(&Command::read_binary(CC_PAGE, 4))?;
        if cc.len() < 4 || cc[0] != CC_MAGIC {
            return Ok(PageProbe {
                variant: TagVariant::Unknown,
                strict: false,
                cc_valid: false,
            });
        }
        let (variant, strict) = refine_page_variant(cc[2]);
        Ok(PageProbe {
            variant,
            strict,
            cc_valid: true,
        })
    }

    fn read_region(&self, transport: &mut dyn CardTransport, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        let mut page = USER_START;
        while data.len() < len {
            let remaining = len - data.len();
            let chunk = remaining.min(READ_CHUNK);
            let payload = transport.exchange(&Command::read_binary(page, chunk as u8))?;
            if payload.len() < chunk {
                return Err(Error::parse(format!(
                    "short read at page {page}: {} of {chunk} bytes",
                    payload.len()
                )));
            }
            data.extend_from_slice(&payload[..chunk]);
            page += (chunk / 4) as u8;
        }
        Ok(data)
    }

    fn write_page(&self, transport: &mut dyn CardTransport, page: u8, data: [u8; 4]) -> Result<()> {
        transport
            .exchange(&Command::update_binary(page, data.to_vec()))
            .map(drop)
    }

    fn read_page(&self, transport: &mut dyn CardTransport, page: u8) -> Result<[u8; 4]> {
        let payload = transport.exchange(&Command::read_binary(page, 4))?;
        payload
            .as_ref()
            .try_into()
            .map_err(|_| Error::parse(format!("short read at page {page}")))
    }

    fn pwd_auth(&self, transport: &mut dyn CardTransport, password: &[u8; 4]) -> Result<()> {
        let mut payload = Vec::with_capacity(5);
        payload.push(PWD_AUTH);
        payload.extend_from_slice(password);
        transport
            .exchange(&Command::direct_transmit(payload))
            .map(drop)
    }

    /// Write `data` into user memory starting at page 4, zero-padded to a
    /// page boundary.
    fn write_user_region(&self, transport: &mut dyn CardTransport, data: &[u8]) -> Result<()> {
        let mut padded = BytesMut::from(data);
        while padded.len() % 4 != 0 {
            padded.extend_from_slice(&[0x00]);
        }

        let pages = padded.len() / 4;
        let user_pages = (self.geometry.user_end - USER_START + 1) as usize;
        if pages > user_pages {
            return Err(Error::bounds(format!(
                "{} bytes exceed user memory ({} pages)",
                data.len(),
                user_pages
            )));
        }

        for (i, chunk) in padded.chunks_exact(4).enumerate() {
            let page = USER_START + i as u8;
            self.write_page(transport, page, [chunk[0], chunk[1], chunk[2], chunk[3]])?;
        }
        Ok(())
    }
}

impl TagDriver for PageDriver {
    fn read_ndef(&self, transport: &mut dyn CardTransport) -> Result<Option<NdefMessage>> {
        let head = self.read_region(transport, 16)?;
        let Some(total) = super::ndef_region_len(&head) else {
            return Ok(None);
        };

        let buf = if total <= head.len() {
            head
        } else {
            self.read_region(transport, total)?
        };

        match NdefMessage::decode(&buf) {
            Ok(message) => Ok(Some(message)),
            Err(nfc_agent_core::NdefError::Empty) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_ndef(&self, transport: &mut dyn CardTransport, message: &NdefMessage) -> Result<()> {
        let encoded = message.encode();
        if encoded.len() > self.geometry.capacity {
            return Err(Error::bounds(format!(
                "encoded message is {} bytes, capacity is {}",
                encoded.len(),
                self.geometry.capacity
            )));
        }

        self.write_user_region(transport, &encoded)?;

        let readback = self.read_region(transport, encoded.len())?;
        if readback != encoded.as_ref() {
            return Err(Error::verify_failed("readback differs from written data"));
        }
        Ok(())
    }

    fn erase(&self, transport: &mut dyn CardTransport) -> Result<()> {
        self.write_page(transport, USER_START, EMPTY_MESSAGE_TLV)?;
        for page in USER_START + 1..=self.geometry.user_end {
            self.write_page(transport, page, [0u8; 4])?;
        }
        Ok(())
    }

    fn lock(&self, transport: &mut dyn CardTransport) -> Result<()> {
        let mut lock_page = self.read_page(transport, STATIC_LOCK_PAGE)?;
        lock_page[2] = 0xFF;
        lock_page[3] = 0xFF;
        self.write_page(transport, STATIC_LOCK_PAGE, lock_page)?;

        if let Some(dynamic) = self.geometry.dynamic_lock {
            self.write_page(transport, dynamic, [0xFF, 0xFF, 0xFF, 0x00])?;
        }
        Ok(())
    }

    fn set_password(
        &self,
        transport: &mut dyn CardTransport,
        password: &[u8; 4],
        pack: &[u8; 2],
        start_page: u8,
    ) -> Result<()> {
        if start_page > self.geometry.pack {
            return Err(Error::bounds(format!(
                "protection start page {start_page} past end of tag"
            )));
        }

        self.write_page(transport, self.geometry.pwd, *password)?;
        self.write_page(transport, self.geometry.pack, [pack[0], pack[1], 0x00, 0x00])?;

        let mut cfg = self.read_page(transport, self.geometry.cfg)?;
        cfg[3] = start_page;
        self.write_page(transport, self.geometry.cfg, cfg)?;

        let mut access = self.read_page(transport, self.geometry.access)?;
        // PROT = 0: password required for writes only.
        access[0] &= 0x7F;
        self.write_page(transport, self.geometry.access, access)?;

        // Prove the password took effect.
        self.pwd_auth(transport, password)
    }

    fn clear_password(&self, transport: &mut dyn CardTransport, password: &[u8; 4]) -> Result<()> {
        self.pwd_auth(transport, password)?;

        let mut cfg = self.read_page(transport, self.geometry.cfg)?;
        cfg[3] = AUTH0_OFF;
        self.write_page(transport, self.geometry.cfg, cfg)?;

        self.write_page(transport, self.geometry.pwd, [0u8; 4])?;
        self.write_page(transport, self.geometry.pack, [0u8; 4])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testutil::MockCard;
    use hex_literal::hex;
    use nfc_agent_core::{ErrorKind, NdefRecord};

    const ATR_NTAG: [u8; 20] = hex!("3b8f8001804f0ca0000003060300030000000068");
    const UID: [u8; 7] = hex!("0442488a837280");

    fn ntag213() -> MockCard {
        let mut card = MockCard::new(&ATR_NTAG, &UID, 45, 4);
        // Factory capability container: E1 10 12 00.
        card.load(3, &[0xE1, 0x10, 0x12, 0x00]);
        card
    }

    #[test]
    fn probe_reads_capability_container() {
        let mut card = ntag213();
        let probe = PageDriver::probe(&mut card).unwrap();
        assert_eq!(probe.variant, TagVariant::Ntag213);
        assert!(probe.strict);
        assert!(probe.cc_valid);
    }

    #[test]
    fn probe_flags_missing_cc() {
        let mut card = MockCard::new(&ATR_NTAG, &UID, 45, 4);
        let probe = PageDriver::probe(&mut card).unwrap();
        assert!(!probe.cc_valid);
        assert_eq!(probe.variant, TagVariant::Unknown);
    }

    #[test]
    fn probe_nonstrict_size_indicator() {
        let mut card = ntag213();
        card.load(3, &[0xE1, 0x10, 0x40, 0x00]);
        let probe = PageDriver::probe(&mut card).unwrap();
        assert_eq!(probe.variant, TagVariant::Ntag215);
        assert!(!probe.strict);
    }

    #[test]
    fn write_and_read_ndef_round_trip() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        let message =
            NdefMessage::new(vec![NdefRecord::text("Hello, World!")]).unwrap();

        driver.write_ndef(&mut card, &message).unwrap();
        // The TLV lands at page 4.
        assert_eq!(card.slice(4, 1)[0], 0x03);

        let read = driver.read_ndef(&mut card).unwrap().unwrap();
        assert_eq!(read, message);
        assert_eq!(read.records()[0].text_content().unwrap(), "Hello, World!");
    }

    #[test]
    fn empty_tag_reads_none() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        assert!(driver.read_ndef(&mut card).unwrap().is_none());
    }

    #[test]
    fn oversized_message_is_refused_before_any_write() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        let big = vec![0xAB; 200];
        let message =
            NdefMessage::new(vec![NdefRecord::mime("application/octet-stream", big)]).unwrap();
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bounds);
        // Nothing was written.
        assert_eq!(card.slice(4, 4), [0u8; 4]);
    }

    #[test]
    fn erase_writes_empty_tlv_and_zeroes_user_memory() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        let message = NdefMessage::new(vec![NdefRecord::text("data")]).unwrap();
        driver.write_ndef(&mut card, &message).unwrap();

        driver.erase(&mut card).unwrap();
        assert_eq!(card.slice(4, 4), EMPTY_MESSAGE_TLV);
        for page in 5..=0x27usize {
            assert_eq!(card.slice(page, 4), [0u8; 4], "page {page} not zeroed");
        }
    }

    #[test]
    fn lock_sets_static_lock_bytes_only() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        card.load(2, &[0x48, 0x00, 0x00, 0x00]);

        driver.lock(&mut card).unwrap();
        assert_eq!(card.slice(2, 4), [0x48, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn lock_also_sets_dynamic_lock_on_large_variants() {
        let driver = PageDriver::new(TagVariant::Ntag215);
        let mut card = MockCard::new(&ATR_NTAG, &UID, 0x87, 4);
        card.load(3, &[0xE1, 0x10, 0x3E, 0x00]);

        driver.lock(&mut card).unwrap();
        assert_eq!(card.slice(0x82, 4), [0xFF, 0xFF, 0xFF, 0x00]);
    }

    #[test]
    fn set_password_writes_pwd_pack_auth0_and_verifies() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        card.load(0x29, &[0x00, 0x00, 0x00, 0xFF]);
        card.load(0x2A, &[0x80, 0x00, 0x00, 0x00]);

        driver
            .set_password(&mut card, &[0x01, 0x02, 0x03, 0x04], &[0xAB, 0xCD], 4)
            .unwrap();

        assert_eq!(card.slice(0x2B, 4), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(card.slice(0x2C, 4), [0xAB, 0xCD, 0x00, 0x00]);
        assert_eq!(card.slice(0x29, 4)[3], 4);
        assert_eq!(card.slice(0x2A, 4)[0] & 0x80, 0);

        // The proving PWD_AUTH went over the wire.
        let auth = card.log.last().unwrap();
        assert_eq!(&auth[..5], &[0xFF, 0x00, 0x00, 0x00, 0x05]);
        assert_eq!(&auth[5..], &[0x1B, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn set_password_rejects_start_page_past_tag() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        let err = driver
            .set_password(&mut card, &[0u8; 4], &[0u8; 2], 0x80)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bounds);
    }

    #[test]
    fn clear_password_requires_current_password() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        card.password = Some(([0x01, 0x02, 0x03, 0x04], [0xAB, 0xCD]));

        let err = driver
            .clear_password(&mut card, &[0x0A, 0x0B, 0x0C, 0x0D])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);

        driver
            .clear_password(&mut card, &[0x01, 0x02, 0x03, 0x04])
            .unwrap();
        assert_eq!(card.slice(0x29, 4)[3], 0xFF);
        assert_eq!(card.slice(0x2B, 4), [0u8; 4]);
        assert_eq!(card.slice(0x2C, 4), [0u8; 4]);
    }

    #[test]
    fn write_failure_detected_by_readback() {
        let driver = PageDriver::new(TagVariant::Ntag213);
        let mut card = ntag213();
        let message = NdefMessage::new(vec![NdefRecord::text("x")]).unwrap();
        driver.write_ndef(&mut card, &message).unwrap();

        // A locked card answers writes with 63 00.
        card.write_locked = true;
        let err = driver.write_ndef(&mut card, &message).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn long_message_spans_multiple_reads() {
        let driver = PageDriver::new(TagVariant::Ntag215);
        let mut card = MockCard::new(&ATR_NTAG, &UID, 0x87, 4);
        card.load(3, &[0xE1, 0x10, 0x3E, 0x00]);

        let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let message =
            NdefMessage::new(vec![NdefRecord::mime("application/octet-stream", payload)]).unwrap();
        driver.write_ndef(&mut card, &message).unwrap();

        let read = driver.read_ndef(&mut card).unwrap().unwrap();
        assert_eq!(read, message);
    }
}
