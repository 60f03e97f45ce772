//! URI prefix compression table
//!
//! NDEF URI records replace a well-known scheme prefix with a single code
//! byte. Codes `0x01..=0x23` are assigned; `0x00` means "no prefix" and
//! everything from `0x24` up is unassigned. The decoder treats unassigned
//! codes as an empty prefix; the encoder never emits them.

/// The assigned prefix table, indexed by code. Code 0 is the empty prefix.
pub const PREFIXES: [&str; 0x24] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// The prefix string for a code; unassigned codes yield the empty prefix.
pub fn prefix(code: u8) -> &'static str {
    PREFIXES.get(code as usize).copied().unwrap_or("")
}

/// Split a URI into `(code, remainder)`, selecting the longest matching
/// assigned prefix. Returns `(0, uri)` when nothing matches.
pub fn split(uri: &str) -> (u8, &str) {
    let mut best: (u8, usize) = (0, 0);
    for (code, pfx) in PREFIXES.iter().enumerate().skip(1) {
        if pfx.len() > best.1 && uri.starts_with(pfx) {
            best = (code as u8, pfx.len());
        }
    }
    (best.0, &uri[best.1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(split("https://www.example.com"), (0x02, "example.com"));
        assert_eq!(split("http://www.example.com"), (0x01, "example.com"));
        assert_eq!(split("https://example.com"), (0x04, "example.com"));
        assert_eq!(split("http://example.com"), (0x03, "example.com"));
    }

    #[test]
    fn scheme_only_and_specials() {
        assert_eq!(split("tel:+1234567890"), (0x05, "+1234567890"));
        assert_eq!(split("mailto:test@example.com"), (0x06, "test@example.com"));
        assert_eq!(split("https://"), (0x04, ""));
        assert_eq!(split("urn:nfc:sp"), (0x23, "sp"));
        // urn:epc:id: is longer than urn: and urn:epc:
        assert_eq!(split("urn:epc:id:x"), (0x1E, "x"));
    }

    #[test]
    fn no_match_is_code_zero() {
        assert_eq!(split("custom://something"), (0x00, "custom://something"));
        assert_eq!(split(""), (0x00, ""));
        // Prefix matching is case sensitive.
        assert_eq!(split("HTTPS://X"), (0x00, "HTTPS://X"));
    }

    #[test]
    fn unassigned_codes_decode_empty() {
        assert_eq!(prefix(0x00), "");
        assert_eq!(prefix(0x04), "https://");
        assert_eq!(prefix(0x23), "urn:nfc:");
        assert_eq!(prefix(0x24), "");
        assert_eq!(prefix(0x50), "");
        assert_eq!(prefix(0xFF), "");
    }

    #[test]
    fn table_round_trip() {
        for code in 1..0x24u8 {
            let uri = format!("{}rest", prefix(code));
            let (got, rest) = split(&uri);
            assert_eq!(format!("{}{}", prefix(got), rest), uri);
        }
    }
}
