//! NDEF message codec
//!
//! Storage tags carry an NDEF message inside a Type-2 TLV: tag `0x03`, a
//! length field (one byte below 255, `0xFF` plus a big-endian u16 above),
//! the concatenated records, and the terminator `0xFE`. Records use the
//! short form whenever the payload fits in a single length byte.
//!
//! The codec round-trips: for any valid message `m`,
//! `decode(&encode(&m)) == m`.

mod uri;

pub use uri::{prefix as uri_prefix, split as uri_split, PREFIXES as URI_PREFIXES};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// NDEF TLV tag for an NDEF message
pub const TLV_NDEF: u8 = 0x03;
/// NDEF TLV terminator
pub const TLV_TERMINATOR: u8 = 0xFE;
/// The TLV written by the erase operation: an empty message plus padding
pub const EMPTY_MESSAGE_TLV: [u8; 4] = [0x03, 0x00, 0xFE, 0x00];

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// Well-known record type `T` (text)
const TYPE_TEXT: &[u8] = b"T";
/// Well-known record type `U` (URI)
const TYPE_URI: &[u8] = b"U";
/// Text record status byte: UTF-8, two-character language code
const TEXT_STATUS: u8 = 0x02;
const TEXT_LANG: &[u8] = b"en";

/// Type Name Format of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tnf {
    /// Empty record
    Empty,
    /// NFC Forum well-known type
    WellKnown,
    /// RFC 2046 media type
    Mime,
    /// Absolute URI
    AbsoluteUri,
    /// NFC Forum external type
    External,
    /// Unknown payload type
    Unknown,
    /// Chunk continuation
    Unchanged,
}

impl Tnf {
    const fn bits(self) -> u8 {
        match self {
            Self::Empty => 0x00,
            Self::WellKnown => 0x01,
            Self::Mime => 0x02,
            Self::AbsoluteUri => 0x03,
            Self::External => 0x04,
            Self::Unknown => 0x05,
            Self::Unchanged => 0x06,
        }
    }

    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Self::Empty),
            0x01 => Some(Self::WellKnown),
            0x02 => Some(Self::Mime),
            0x03 => Some(Self::AbsoluteUri),
            0x04 => Some(Self::External),
            0x05 => Some(Self::Unknown),
            0x06 => Some(Self::Unchanged),
            _ => None,
        }
    }
}

/// Structured decode failure, carrying the byte offset it was detected at
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NdefError {
    /// No `0x03` TLV was found in the buffer
    #[error("no NDEF TLV found in {0} bytes")]
    NoTlv(usize),
    /// The length field ran past the end of the buffer
    #[error("truncated TLV length field at offset {0}")]
    TruncatedLength(usize),
    /// The value ran past the end of the buffer
    #[error("TLV value truncated at offset {0}")]
    TruncatedValue(usize),
    /// The byte after the value was not `0xFE`
    #[error("missing TLV terminator at offset {0}")]
    MissingTerminator(usize),
    /// A record header or length was malformed
    #[error("malformed record at offset {0}: {1}")]
    Record(usize, &'static str),
    /// MB/ME framing bits were inconsistent
    #[error("invalid message framing: {0}")]
    Framing(&'static str),
    /// The message contained no records
    #[error("message contains no records")]
    Empty,
}

impl From<NdefError> for crate::Error {
    fn from(err: NdefError) -> Self {
        Self::parse(err.to_string())
    }
}

/// A single NDEF record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NdefRecord {
    /// Type Name Format
    pub tnf: Tnf,
    /// Record type field (e.g. `T`, `U`, a media type)
    #[serde(with = "utf8_bytes", rename = "type")]
    pub record_type: Bytes,
    /// Raw payload
    #[serde(with = "hex_bytes")]
    pub payload: Bytes,
    /// Message-begin flag
    pub mb: bool,
    /// Message-end flag
    pub me: bool,
    /// Short-record form (payload length below 256)
    pub sr: bool,
}

impl NdefRecord {
    /// Create a record with framing flags cleared; [`NdefMessage::new`]
    /// assigns them from position.
    pub fn new<T: Into<Bytes>, P: Into<Bytes>>(tnf: Tnf, record_type: T, payload: P) -> Self {
        let payload = payload.into();
        let sr = payload.len() < 256;
        Self {
            tnf,
            record_type: record_type.into(),
            payload,
            mb: false,
            me: false,
            sr,
        }
    }

    /// A well-known text record: UTF-8, language `en`
    pub fn text(text: &str) -> Self {
        let mut payload = BytesMut::with_capacity(1 + TEXT_LANG.len() + text.len());
        payload.put_u8(TEXT_STATUS);
        payload.put_slice(TEXT_LANG);
        payload.put_slice(text.as_bytes());
        Self::new(Tnf::WellKnown, TYPE_TEXT, payload.freeze())
    }

    /// A well-known URI record with prefix compression
    pub fn uri(uri: &str) -> Self {
        let (code, rest) = uri_split(uri);
        let mut payload = BytesMut::with_capacity(1 + rest.len());
        payload.put_u8(code);
        payload.put_slice(rest.as_bytes());
        Self::new(Tnf::WellKnown, TYPE_URI, payload.freeze())
    }

    /// A MIME record carrying raw bytes under a media type
    pub fn mime<P: Into<Bytes>>(media_type: &str, payload: P) -> Self {
        Self::new(Tnf::Mime, Bytes::copy_from_slice(media_type.as_bytes()), payload)
    }

    /// True for well-known `T` records
    pub fn is_text(&self) -> bool {
        self.tnf == Tnf::WellKnown && self.record_type.as_ref() == TYPE_TEXT
    }

    /// True for well-known `U` records
    pub fn is_uri(&self) -> bool {
        self.tnf == Tnf::WellKnown && self.record_type.as_ref() == TYPE_URI
    }

    /// Decode the text of a `T` record, honoring the status byte's
    /// language-code length
    pub fn text_content(&self) -> Option<String> {
        if !self.is_text() || self.payload.is_empty() {
            return None;
        }
        let lang_len = (self.payload[0] & 0x3F) as usize;
        let start = 1 + lang_len;
        if start > self.payload.len() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.payload[start..]).into_owned())
    }

    /// Reassemble the URI of a `U` record; unknown codes decode as an
    /// empty prefix
    pub fn uri_content(&self) -> Option<String> {
        if !self.is_uri() || self.payload.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.payload[1..]);
        Some(format!("{}{}", uri_prefix(self.payload[0]), rest))
    }

    fn header(&self) -> u8 {
        let mut header = self.tnf.bits();
        if self.mb {
            header |= FLAG_MB;
        }
        if self.me {
            header |= FLAG_ME;
        }
        if self.sr {
            header |= FLAG_SR;
        }
        header
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.header());
        buf.put_u8(self.record_type.len() as u8);
        if self.sr {
            buf.put_u8(self.payload.len() as u8);
        } else {
            buf.put_u32(self.payload.len() as u32);
        }
        buf.put_slice(&self.record_type);
        buf.put_slice(&self.payload);
    }
}

/// An ordered sequence of records, 1..N
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NdefMessage {
    records: Vec<NdefRecord>,
}

impl NdefMessage {
    /// Build a message, assigning MB to the first record, ME to the last,
    /// and the short-record flag from each payload length.
    pub fn new(mut records: Vec<NdefRecord>) -> Result<Self, NdefError> {
        if records.is_empty() {
            return Err(NdefError::Empty);
        }
        let last = records.len() - 1;
        for (i, record) in records.iter_mut().enumerate() {
            record.mb = i == 0;
            record.me = i == last;
            record.sr = record.payload.len() < 256;
        }
        Ok(Self { records })
    }

    /// The records in message order
    pub fn records(&self) -> &[NdefRecord] {
        &self.records
    }

    /// Encode the records and wrap them in the NDEF TLV.
    pub fn encode(&self) -> Bytes {
        let mut records = BytesMut::new();
        for record in &self.records {
            record.encode_into(&mut records);
        }

        let mut out = BytesMut::with_capacity(records.len() + 5);
        out.put_u8(TLV_NDEF);
        if records.len() < 255 {
            out.put_u8(records.len() as u8);
        } else {
            out.put_u8(0xFF);
            out.put_u16(records.len() as u16);
        }
        out.put_slice(&records);
        out.put_u8(TLV_TERMINATOR);
        out.freeze()
    }

    /// Locate the NDEF TLV in `buf` and decode the message inside it.
    /// Leading NULL TLVs (`0x00`) are skipped.
    pub fn decode(buf: &[u8]) -> Result<Self, NdefError> {
        let mut pos = 0;
        while pos < buf.len() && buf[pos] == 0x00 {
            pos += 1;
        }
        if pos >= buf.len() || buf[pos] != TLV_NDEF {
            return Err(NdefError::NoTlv(buf.len()));
        }

        let len_off = pos + 1;
        let (value_len, value_off) = match buf.get(len_off) {
            None => return Err(NdefError::TruncatedLength(len_off)),
            Some(0xFF) => {
                if len_off + 2 >= buf.len() {
                    return Err(NdefError::TruncatedLength(len_off));
                }
                let len = u16::from_be_bytes([buf[len_off + 1], buf[len_off + 2]]) as usize;
                (len, len_off + 3)
            }
            Some(&short) => (short as usize, len_off + 1),
        };

        let value_end = value_off + value_len;
        if value_end > buf.len() {
            return Err(NdefError::TruncatedValue(value_off));
        }
        if buf.get(value_end) != Some(&TLV_TERMINATOR) {
            return Err(NdefError::MissingTerminator(value_end));
        }

        Self::decode_records(&buf[value_off..value_end], value_off)
    }

    /// Decode bare record bytes (already unwrapped from the TLV).
    fn decode_records(buf: &[u8], base: usize) -> Result<Self, NdefError> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let record = parse_record(buf, &mut pos, base)?;
            records.push(record);
        }
        if records.is_empty() {
            return Err(NdefError::Empty);
        }

        let last = records.len() - 1;
        for (i, record) in records.iter().enumerate() {
            match (i == 0, record.mb) {
                (true, false) => return Err(NdefError::Framing("MB missing on first record")),
                (false, true) => return Err(NdefError::Framing("MB set past first record")),
                _ => {}
            }
            match (i == last, record.me) {
                (true, false) => return Err(NdefError::Framing("ME missing on last record")),
                (false, true) => return Err(NdefError::Framing("ME set before last record")),
                _ => {}
            }
        }

        Ok(Self { records })
    }
}

fn parse_record(buf: &[u8], pos: &mut usize, base: usize) -> Result<NdefRecord, NdefError> {
    let start = *pos;
    let at = |rel: usize| base + start + rel;

    let header = *buf
        .get(start)
        .ok_or(NdefError::Record(base + start, "empty record"))?;
    if header & FLAG_CF != 0 {
        return Err(NdefError::Record(at(0), "chunked records not supported"));
    }
    let tnf = Tnf::from_bits(header & TNF_MASK)
        .ok_or(NdefError::Record(at(0), "reserved TNF value"))?;
    let sr = header & FLAG_SR != 0;
    let il = header & FLAG_IL != 0;

    let type_len = *buf
        .get(start + 1)
        .ok_or(NdefError::Record(at(1), "missing type length"))? as usize;

    let (payload_len, mut idx) = if sr {
        let len = *buf
            .get(start + 2)
            .ok_or(NdefError::Record(at(2), "missing payload length"))? as usize;
        (len, start + 3)
    } else {
        let bytes = buf
            .get(start + 2..start + 6)
            .ok_or(NdefError::Record(at(2), "missing payload length"))?;
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        (len, start + 6)
    };

    let id_len = if il {
        let len = *buf
            .get(idx)
            .ok_or(NdefError::Record(base + idx, "missing id length"))? as usize;
        idx += 1;
        len
    } else {
        0
    };

    let record_type = buf
        .get(idx..idx + type_len)
        .ok_or(NdefError::Record(base + idx, "type truncated"))?;
    idx += type_len + id_len;

    let payload = buf
        .get(idx..idx + payload_len)
        .ok_or(NdefError::Record(base + idx, "payload truncated"))?;
    idx += payload_len;

    *pos = idx;
    Ok(NdefRecord {
        tnf,
        record_type: Bytes::copy_from_slice(record_type),
        payload: Bytes::copy_from_slice(payload),
        mb: header & FLAG_MB != 0,
        me: header & FLAG_ME != 0,
        sr,
    })
}

mod utf8_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Bytes::from(s.into_bytes()))
    }
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(record: NdefRecord) -> NdefMessage {
        NdefMessage::new(vec![record]).unwrap()
    }

    #[test]
    fn text_record_header_byte() {
        // MB | ME | SR | TNF=1
        let encoded = single(NdefRecord::text("test")).encode();
        assert_eq!(encoded[0], 0x03);
        assert_eq!(encoded[2], 0xD1);
        assert_eq!(*encoded.last().unwrap(), 0xFE);
    }

    #[test]
    fn framing_flags_by_position() {
        let msg = NdefMessage::new(vec![
            NdefRecord::uri("https://x"),
            NdefRecord::text("mid"),
            NdefRecord::mime("application/json", &b"{}"[..]),
        ])
        .unwrap();
        let headers: Vec<u8> = msg.records().iter().map(|r| r.header()).collect();
        assert_eq!(headers[0], 0x91); // MB | SR | well-known
        assert_eq!(headers[1], 0x11); // SR | well-known
        assert_eq!(headers[2], 0x52); // ME | SR | mime
    }

    #[test]
    fn type_and_payload_length_bytes() {
        let encoded = single(NdefRecord::uri("https://example.com")).encode();
        // After TLV tag and length: header, type length, payload length.
        assert_eq!(encoded[3], 1); // "U"
        assert_eq!(encoded[4] as usize, 1 + "example.com".len());
        assert_eq!(encoded[5], b'U');
    }

    #[test]
    fn uri_payload_prefix_compression() {
        let record = NdefRecord::uri("https://www.example.com");
        assert_eq!(record.payload[0], 0x02);
        assert_eq!(&record.payload[1..], b"example.com");
        assert_eq!(
            single(record).records()[0].uri_content().unwrap(),
            "https://www.example.com"
        );
    }

    #[test]
    fn long_payload_uses_four_byte_length() {
        let payload: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let msg = single(NdefRecord::mime("application/octet-stream", payload.clone()));
        let record = &msg.records()[0];
        assert!(!record.sr);
        // MB | ME | TNF=2, no SR
        assert_eq!(record.header(), 0xC2);

        let encoded = msg.encode();
        // Message exceeds 254 bytes, so the TLV uses the three-byte form.
        assert_eq!(encoded[1], 0xFF);
        let decoded = NdefMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.records()[0].payload.as_ref(), &payload[..]);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_preserves_records_order_and_payloads() {
        let cases = vec![
            single(NdefRecord::text("Hello, World!")),
            single(NdefRecord::text("")),
            single(NdefRecord::text("Hello, 世界!")),
            single(NdefRecord::uri("tel:+1234567890")),
            single(NdefRecord::uri("custom://app/path")),
            single(NdefRecord::mime("application/json", &b"{\"key\":\"value\"}"[..])),
            NdefMessage::new(vec![
                NdefRecord::uri("https://x"),
                NdefRecord::mime("application/json", &b"{\"id\":1}"[..]),
            ])
            .unwrap(),
        ];
        for msg in cases {
            let encoded = msg.encode();
            assert_eq!(encoded[0], 0x03);
            assert_eq!(*encoded.last().unwrap(), 0xFE);
            assert_eq!(NdefMessage::decode(&encoded).unwrap(), msg);
        }
    }

    #[test]
    fn multi_record_url_and_json() {
        let msg = NdefMessage::new(vec![
            NdefRecord::uri("https://x"),
            NdefRecord::mime("application/json", &b"{\"id\":1}"[..]),
        ])
        .unwrap();
        let first = &msg.records()[0];
        assert_eq!(first.payload[0], 0x04);
        assert_eq!(&first.payload[1..], b"x");
        assert!(first.mb && !first.me);
        let second = &msg.records()[1];
        assert_eq!(second.record_type.as_ref(), b"application/json");
        assert!(!second.mb && second.me);
        assert!(msg.encode().len() < 64);
    }

    #[test]
    fn text_status_byte_respected_on_decode() {
        // Five-character language code.
        let mut payload = vec![0x05];
        payload.extend_from_slice(b"en-US");
        payload.extend_from_slice(b"hi");
        let msg = single(NdefRecord::new(Tnf::WellKnown, &b"T"[..], payload));
        assert_eq!(msg.records()[0].text_content().unwrap(), "hi");
    }

    #[test]
    fn decode_skips_leading_null_tlvs() {
        let encoded = single(NdefRecord::text("x")).encode();
        let mut padded = vec![0x00, 0x00, 0x00];
        padded.extend_from_slice(&encoded);
        assert!(NdefMessage::decode(&padded).is_ok());
    }

    #[test]
    fn decode_rejects_malformed_tlv() {
        assert_eq!(NdefMessage::decode(&[]), Err(NdefError::NoTlv(0)));
        assert_eq!(NdefMessage::decode(&[0x01, 0x02]), Err(NdefError::NoTlv(2)));
        assert_eq!(NdefMessage::decode(&[0x03]), Err(NdefError::TruncatedLength(1)));
        assert_eq!(
            NdefMessage::decode(&[0x03, 0xFF, 0x00]),
            Err(NdefError::TruncatedLength(1))
        );
        assert_eq!(
            NdefMessage::decode(&[0x03, 0x10, 0xD1]),
            Err(NdefError::TruncatedValue(2))
        );

        // Valid value but the terminator byte is wrong.
        let mut encoded = single(NdefRecord::text("x")).encode().to_vec();
        let last = encoded.len() - 1;
        encoded[last] = 0x00;
        assert_eq!(
            NdefMessage::decode(&encoded),
            Err(NdefError::MissingTerminator(last))
        );
    }

    #[test]
    fn decode_rejects_bad_framing() {
        // Two records both claiming MB|ME.
        let mut records = BytesMut::new();
        for _ in 0..2 {
            let mut r = NdefRecord::text("x");
            r.mb = true;
            r.me = true;
            r.sr = true;
            r.encode_into(&mut records);
        }
        let mut buf = vec![0x03, records.len() as u8];
        buf.extend_from_slice(&records);
        buf.push(0xFE);
        assert!(matches!(
            NdefMessage::decode(&buf),
            Err(NdefError::Framing(_))
        ));
    }

    #[test]
    fn empty_message_rejected() {
        assert_eq!(NdefMessage::new(vec![]), Err(NdefError::Empty));
        assert_eq!(
            NdefMessage::decode(&[0x03, 0x00, 0xFE]),
            Err(NdefError::Empty)
        );
    }

    #[test]
    fn serde_shape() {
        let msg = single(NdefRecord::mime("application/json", &b"{}"[..]));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json[0]["tnf"], "mime");
        assert_eq!(json[0]["type"], "application/json");
        assert_eq!(json[0]["payload"], "7b7d");
        let back: NdefMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
