//! Output parsing for the pm3 text client
//!
//! The client prints free-form human-oriented text; these routines pull the
//! structured pieces back out. Patterns are compiled once and shared.

use once_cell::sync::Lazy;
use regex::Regex;

use nfc_agent_core::{TagFamily, TagVariant};

use crate::error::LabError;

static UID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"UID:\s*((?:[0-9A-Fa-f]{2}\s*)+)").unwrap());
// ISO 15693 format: "UID....... E0 04 01 08 66 15 39 80"
static UID15_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"UID\.+\s*((?:[0-9A-Fa-f]{2}\s*)+)").unwrap());
static SAK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SAK:\s*([0-9A-Fa-f]+)").unwrap());
static BLOCK_DATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:data|block\s+\d+):\s*((?:[0-9A-Fa-f]{2}\s*)+)").unwrap());
// Page dump format: "block 4 | AA BB CC DD | ...."
static PAGE_DATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"block\s+\d+\s*\|\s*((?:[0-9A-Fa-f]{2}\s*)+)").unwrap());
// ISO 15693 type: "TYPE MATCH NXP (Philips); IC SL2 ICS2602 ( SLIX2 )"
static TYPE15_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"TYPE MATCH\s+(.+)").unwrap());

/// Matches the interactive prompt, e.g. "[usb] pm3 -->" — used to discard
/// command echo lines
pub(crate) static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[.+\]\s+pm3\s+-->").unwrap());
/// Matches the ready banner printed once the device link is up
pub(crate) static READY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Communicating with PM3").unwrap());

/// The tag kind inferred from identify output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTagKind {
    /// A page-addressed NTAG variant
    Page(TagVariant),
    /// A sector-addressed MIFARE Classic variant
    Sector(TagVariant),
    /// An ISO 15693 block tag variant
    Block(TagVariant),
    /// Recognized card, family unknown
    Unknown,
}

impl ParsedTagKind {
    /// The (family, variant) pair for the card snapshot
    pub const fn classify(&self) -> (TagFamily, TagVariant) {
        match self {
            Self::Page(v) => (TagFamily::NtagPage, *v),
            Self::Sector(v) => (TagFamily::MifareClassic, *v),
            Self::Block(v) => (TagFamily::Iso15693, *v),
            Self::Unknown => (TagFamily::Unknown, TagVariant::Unknown),
        }
    }
}

/// Card identity parsed from an identify command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabCardInfo {
    /// Card UID bytes
    pub uid: Vec<u8>,
    /// Select acknowledge, when the protocol reports one
    pub sak: Option<u8>,
    /// Inferred tag kind
    pub kind: ParsedTagKind,
}

/// Parse the output of `hf 14a reader`.
pub fn parse_hf14a_info(output: &str) -> Result<LabCardInfo, LabError> {
    let uid = UID_RE
        .captures(output)
        .and_then(|c| decode_spaced_hex(&c[1]))
        .ok_or_else(|| LabError::Parse("no UID found in output".into()))?;

    let sak = SAK_RE
        .captures(output)
        .and_then(|c| decode_spaced_hex(&c[1]))
        .and_then(|b| b.first().copied());

    Ok(LabCardInfo {
        kind: detect_14a_kind(output, sak),
        uid,
        sak,
    })
}

/// Parse the output of `hf 15 reader`.
pub fn parse_hf15_info(output: &str) -> Result<LabCardInfo, LabError> {
    let uid = UID15_RE
        .captures(output)
        .and_then(|c| decode_spaced_hex(&c[1]))
        .ok_or_else(|| LabError::Parse("no UID found in output".into()))?;

    let variant = match TYPE15_RE.captures(output) {
        Some(c) if c[1].to_lowercase().contains("slix2") => TagVariant::Slix2,
        _ => TagVariant::Slix,
    };

    Ok(LabCardInfo {
        uid,
        sak: None,
        kind: ParsedTagKind::Block(variant),
    })
}

fn detect_14a_kind(output: &str, sak: Option<u8>) -> ParsedTagKind {
    let lower = output.to_lowercase();

    if lower.contains("ntag213") {
        return ParsedTagKind::Page(TagVariant::Ntag213);
    }
    if lower.contains("ntag215") {
        return ParsedTagKind::Page(TagVariant::Ntag215);
    }
    if lower.contains("ntag216") {
        return ParsedTagKind::Page(TagVariant::Ntag216);
    }
    if lower.contains("ntag21") || lower.contains("ultralight") {
        return ParsedTagKind::Page(TagVariant::Unknown);
    }

    match sak {
        Some(0x08) => ParsedTagKind::Sector(TagVariant::Mfc1k),
        Some(0x18) => ParsedTagKind::Sector(TagVariant::Mfc4k),
        _ if lower.contains("mifare classic") => {
            if lower.contains("4k") {
                ParsedTagKind::Sector(TagVariant::Mfc4k)
            } else {
                ParsedTagKind::Sector(TagVariant::Mfc1k)
            }
        }
        _ => ParsedTagKind::Unknown,
    }
}

/// Parse a 16-byte block from MIFARE read output.
pub fn parse_block_data(output: &str) -> Result<Vec<u8>, LabError> {
    BLOCK_DATA_RE
        .captures(output)
        .and_then(|c| decode_spaced_hex(&c[1]))
        .ok_or_else(|| LabError::Parse("no block data found".into()))
}

/// Parse a 4-byte page from Ultralight/NTAG read output; falls back to the
/// generic block format.
pub fn parse_mfu_page(output: &str) -> Result<Vec<u8>, LabError> {
    if let Some(data) = PAGE_DATA_RE
        .captures(output)
        .and_then(|c| decode_spaced_hex(&c[1]))
    {
        return Ok(data);
    }
    parse_block_data(output)
}

/// Reassemble the raw NDEF bytes from `hf mfu ndefread` output: every
/// non-bracketed line that decodes as hex contributes in order.
pub fn parse_ndef_dump(output: &str) -> Result<Vec<u8>, LabError> {
    let mut data = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') {
            continue;
        }
        let cleaned: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if let Ok(bytes) = hex::decode(&cleaned) {
            data.extend_from_slice(&bytes);
        }
    }
    if data.is_empty() {
        return Err(LabError::Parse("no NDEF data found".into()));
    }
    Ok(data)
}

/// True when a write command's output carries a success token.
pub fn is_write_success(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["ok", "successful", "done"]
        .iter()
        .any(|token| lower.contains(token))
}

/// Scan accumulated output for the known failure tokens.
pub fn detect_output_error(output: &str) -> Option<LabError> {
    let lower = output.to_lowercase();

    const NO_CARD: [&str; 5] = [
        "no tag found",
        "can't select card",
        "no card",
        "tag lost",
        "iso14443a card select failed",
    ];
    if NO_CARD.iter().any(|t| lower.contains(t)) {
        return Some(LabError::NoCard);
    }

    const AUTH: [&str; 4] = [
        "authentication failed",
        "auth error",
        "wrong key",
        "nested authentication failed",
    ];
    if AUTH.iter().any(|t| lower.contains(t)) {
        return Some(LabError::AuthFailed);
    }

    None
}

fn decode_spaced_hex(s: &str) -> Option<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HF14A_NTAG: &str = "\
[+]  UID: 04 42 48 8A 83 72 80
[+] ATQA: 00 44
[+]  SAK: 00 [2]
[+] MANUFACTURER: NXP Semiconductors Germany
[=] ---------- NTAG213 tag ----------";

    const HF14A_MIFARE: &str = "\
[+]  UID: 93 2B AE 0E
[+] ATQA: 00 04
[+]  SAK: 08 [2]
[+] possible types:
[+]    MIFARE Classic 1K";

    const HF15_SLIX2: &str = "\
[+] UID....... E0 04 01 08 66 15 39 80
[+] TYPE MATCH NXP (Philips); IC SL2 ICS2602 ( SLIX2 )";

    #[test]
    fn parses_14a_ntag() {
        let info = parse_hf14a_info(HF14A_NTAG).unwrap();
        assert_eq!(hex::encode(&info.uid), "0442488a837280");
        assert_eq!(info.sak, Some(0x00));
        assert_eq!(info.kind, ParsedTagKind::Page(TagVariant::Ntag213));
    }

    #[test]
    fn parses_14a_mifare_by_sak() {
        let info = parse_hf14a_info(HF14A_MIFARE).unwrap();
        assert_eq!(hex::encode(&info.uid), "932bae0e");
        assert_eq!(info.kind, ParsedTagKind::Sector(TagVariant::Mfc1k));
    }

    #[test]
    fn parses_15_slix2() {
        let info = parse_hf15_info(HF15_SLIX2).unwrap();
        assert_eq!(hex::encode(&info.uid), "e004010866153980");
        assert_eq!(info.kind, ParsedTagKind::Block(TagVariant::Slix2));
        let (family, variant) = info.kind.classify();
        assert_eq!(family, TagFamily::Iso15693);
        assert_eq!(variant, TagVariant::Slix2);
    }

    #[test]
    fn missing_uid_is_parse_error() {
        assert!(matches!(
            parse_hf14a_info("[+] nothing useful"),
            Err(LabError::Parse(_))
        ));
        assert!(matches!(parse_hf15_info(""), Err(LabError::Parse(_))));
    }

    #[test]
    fn parses_block_and_page_data() {
        let out = "[=] data: 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F";
        assert_eq!(parse_block_data(out).unwrap().len(), 16);

        let page = "[=] block 4 | 03 0B D1 01 | ....";
        assert_eq!(parse_mfu_page(page).unwrap(), vec![0x03, 0x0B, 0xD1, 0x01]);
    }

    #[test]
    fn ndef_dump_skips_bracketed_lines() {
        let out = "\
[=] reading NDEF
03 0B D1 01
07 54 02 65 6E 68 69 FE
[+] done";
        let data = parse_ndef_dump(out).unwrap();
        assert_eq!(data[0], 0x03);
        assert_eq!(*data.last().unwrap(), 0xFE);
    }

    #[test]
    fn write_success_tokens() {
        assert!(is_write_success("Write block successful"));
        assert!(is_write_success("[+] Done"));
        assert!(is_write_success("[+] ok"));
        assert!(!is_write_success("[-] something else"));
    }

    #[test]
    fn error_token_detection() {
        assert!(matches!(
            detect_output_error("[-] No tag found"),
            Some(LabError::NoCard)
        ));
        assert!(matches!(
            detect_output_error("[-] Can't select card"),
            Some(LabError::NoCard)
        ));
        assert!(matches!(
            detect_output_error("[-] auth error"),
            Some(LabError::AuthFailed)
        ));
        assert!(matches!(
            detect_output_error("[-] wrong key"),
            Some(LabError::AuthFailed)
        ));
        assert!(detect_output_error("[+] all fine").is_none());
    }

    #[test]
    fn prompt_and_ready_patterns() {
        assert!(PROMPT_RE.is_match("[usb] pm3 --> hf 15 reader"));
        assert!(PROMPT_RE.is_match("[usb|script] pm3 --> quit"));
        assert!(!PROMPT_RE.is_match("data: 00 11"));
        assert!(READY_RE.is_match("[=] Communicating with PM3 over USB"));
    }
}
