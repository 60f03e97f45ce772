//! Tag family classification from the answer-to-reset
//!
//! PC/SC contactless readers encode the card's standard-and-name in the
//! historical bytes of the synthesized ATR. Two four-byte discriminator
//! tokens identify the standard, and byte 14 splits the ISO 14443-3 space
//! into sector tags and page tags. The classifier is pure and total: any
//! byte string yields a classification, with `Unknown` as the fallback.

use crate::card::{TagFamily, TagVariant};

/// Discriminator token for ISO 15693 cards
const TOKEN_ISO15693: [u8; 4] = [0x03, 0x06, 0x0B, 0x00];
/// Discriminator token for ISO 14443-3 cards
const TOKEN_ISO14443: [u8; 4] = [0x03, 0x06, 0x03, 0x00];
/// Tokens never occur before the RID in the historical bytes
const SCAN_OFFSET: usize = 10;

/// CC size indicators for the three page-family variants
const CC_SIZE_NTAG213: u8 = 0x12;
const CC_SIZE_NTAG215: u8 = 0x3E;
const CC_SIZE_NTAG216: u8 = 0x6D;

/// Result of classifying an ATR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Detected family
    pub family: TagFamily,
    /// Detected variant; for the page family this stays `Unknown` until the
    /// capability container has been read (see [`refine_page_variant`])
    pub variant: TagVariant,
}

impl Classification {
    const fn unknown() -> Self {
        Self {
            family: TagFamily::Unknown,
            variant: TagVariant::Unknown,
        }
    }
}

/// Classify an ATR byte sequence into a tag family and variant.
pub fn classify(atr: &[u8]) -> Classification {
    if find_token(atr, &TOKEN_ISO15693).is_some() {
        return Classification {
            family: TagFamily::Iso15693,
            variant: TagVariant::Slix,
        };
    }

    if find_token(atr, &TOKEN_ISO14443).is_some() {
        let Some(&name) = atr.get(14) else {
            return Classification::unknown();
        };
        return match name {
            0x01 => Classification {
                family: TagFamily::MifareClassic,
                variant: TagVariant::Mfc1k,
            },
            0x02 => Classification {
                family: TagFamily::MifareClassic,
                variant: TagVariant::Mfc4k,
            },
            0x03 => Classification {
                family: TagFamily::NtagPage,
                variant: TagVariant::Unknown,
            },
            // Empirical split; tags outside it stay read-only.
            _ => Classification::unknown(),
        };
    }

    Classification::unknown()
}

/// Refine a page-family variant from the capability container size
/// indicator. Returns the variant and whether the indicator matched a known
/// value exactly; indicators outside the table choose the closest smaller
/// capacity and report non-strict.
pub const fn refine_page_variant(size_indicator: u8) -> (TagVariant, bool) {
    match size_indicator {
        CC_SIZE_NTAG213 => (TagVariant::Ntag213, true),
        CC_SIZE_NTAG215 => (TagVariant::Ntag215, true),
        CC_SIZE_NTAG216 => (TagVariant::Ntag216, true),
        s if s >= CC_SIZE_NTAG216 => (TagVariant::Ntag216, false),
        s if s >= CC_SIZE_NTAG215 => (TagVariant::Ntag215, false),
        _ => (TagVariant::Ntag213, false),
    }
}

/// Find the earliest occurrence of `token` at or past the scan offset.
fn find_token(atr: &[u8], token: &[u8; 4]) -> Option<usize> {
    if atr.len() < SCAN_OFFSET + token.len() {
        return None;
    }
    atr[SCAN_OFFSET..]
        .windows(token.len())
        .position(|w| w == token)
        .map(|i| i + SCAN_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // ATRs captured from real hardware: an ACR122U with a MIFARE Classic,
    // an ACR1552 with a SLIX, and an ACR1252 with an NTAG213.
    const ATR_MIFARE_1K: [u8; 20] = hex!("3b8f8001804f0ca000000306030001000000006a");
    const ATR_ISO15693: [u8; 20] = hex!("3b8f8001804f0ca0000003060b00140000000077");
    const ATR_NTAG: [u8; 20] = hex!("3b8f8001804f0ca0000003060300030000000068");

    #[test]
    fn classifies_mifare_classic_1k() {
        let c = classify(&ATR_MIFARE_1K);
        assert_eq!(c.family, TagFamily::MifareClassic);
        assert_eq!(c.variant, TagVariant::Mfc1k);
    }

    #[test]
    fn classifies_iso15693() {
        let c = classify(&ATR_ISO15693);
        assert_eq!(c.family, TagFamily::Iso15693);
        assert_eq!(c.variant, TagVariant::Slix);
    }

    #[test]
    fn classifies_page_family_pending_cc() {
        let c = classify(&ATR_NTAG);
        assert_eq!(c.family, TagFamily::NtagPage);
        assert_eq!(c.variant, TagVariant::Unknown);
    }

    #[test]
    fn mfc4k_from_byte_14() {
        let mut atr = ATR_MIFARE_1K;
        atr[14] = 0x02;
        let c = classify(&atr);
        assert_eq!(c.variant, TagVariant::Mfc4k);
    }

    #[test]
    fn unknown_name_byte_is_unknown_family() {
        let mut atr = ATR_NTAG;
        atr[14] = 0x26;
        let c = classify(&atr);
        assert_eq!(c.family, TagFamily::Unknown);
        assert_eq!(c.variant, TagVariant::Unknown);
    }

    #[test]
    fn total_over_arbitrary_inputs() {
        assert_eq!(classify(&[]).family, TagFamily::Unknown);
        assert_eq!(classify(&[0x3B]).family, TagFamily::Unknown);
        assert_eq!(classify(&[0xFF; 64]).family, TagFamily::Unknown);
        // Token present but before the scan offset is not a match.
        let mut early = [0u8; 20];
        early[2..6].copy_from_slice(&[0x03, 0x06, 0x0B, 0x00]);
        assert_eq!(classify(&early).family, TagFamily::Unknown);
    }

    #[test]
    fn iso15693_checked_before_iso14443() {
        // Both tokens present: the 15693 branch wins regardless of position.
        let mut atr = [0u8; 24];
        atr[10..14].copy_from_slice(&[0x03, 0x06, 0x03, 0x00]);
        atr[16..20].copy_from_slice(&[0x03, 0x06, 0x0B, 0x00]);
        assert_eq!(classify(&atr).family, TagFamily::Iso15693);
    }

    #[test]
    fn cc_refinement() {
        assert_eq!(refine_page_variant(0x12), (TagVariant::Ntag213, true));
        assert_eq!(refine_page_variant(0x3E), (TagVariant::Ntag215, true));
        assert_eq!(refine_page_variant(0x6D), (TagVariant::Ntag216, true));
        // Off-table indicators round down and report non-strict.
        assert_eq!(refine_page_variant(0x10), (TagVariant::Ntag213, false));
        assert_eq!(refine_page_variant(0x40), (TagVariant::Ntag215, false));
        assert_eq!(refine_page_variant(0x7F), (TagVariant::Ntag216, false));
    }
}
