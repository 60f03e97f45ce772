//! Card operation facade
//!
//! One entry point per canonical operation, keyed by reader name. The
//! facade opens a PC/SC connection per operation (shared mode, any
//! protocol), classifies the card from its ATR, dispatches to the family
//! driver and releases the connection on every exit path — or routes to
//! the lab executor when the name matches the lab reader's virtual slot.
//! A per-reader gate totally orders operations on each physical reader;
//! contenders queue FIFO.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use nfc_agent_apdu::{CardTransport, Command, Disposition};
use nfc_agent_core::atr::{self, Classification};
use nfc_agent_core::{Card, Error, ErrorKind, NdefMessage, NdefRecord, Result, TagFamily};
use nfc_agent_pcsc::{PcscError, PcscManager, PcscTransport};
use nfc_agent_proxmark::LabExecutor;

use crate::driver::{BlockDriver, PageDriver, SectorDriver, TagDriver};
use crate::lab;
use crate::readers::is_lab_reader;

/// Default first protected page when installing a password: the capability
/// container stays readable, user memory is covered
const DEFAULT_AUTH0_PAGE: u8 = 4;

/// The payload interpretations a write accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// NDEF text record
    Text,
    /// NDEF URI record with prefix compression
    Url,
    /// MIME record, `application/json`
    Json,
    /// MIME record, `application/octet-stream`
    Binary,
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "url" => Ok(Self::Url),
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(Error::validation(format!("unknown dataType: {other}"))),
        }
    }
}

/// Build the NDEF message for a write payload. A `url` alongside a
/// non-URL payload becomes an extra leading URI record.
pub(crate) fn build_message(
    data_type: DataType,
    data: &[u8],
    url: Option<&str>,
) -> Result<NdefMessage> {
    let as_text = || {
        std::str::from_utf8(data)
            .map_err(|_| Error::validation("payload is not valid UTF-8"))
    };

    let payload_record = match data_type {
        DataType::Text => NdefRecord::text(as_text()?),
        DataType::Url => NdefRecord::uri(as_text()?),
        DataType::Json => NdefRecord::mime("application/json", data.to_vec()),
        DataType::Binary => NdefRecord::mime("application/octet-stream", data.to_vec()),
    };

    let mut records = Vec::with_capacity(2);
    if let (Some(url), false) = (url, data_type == DataType::Url) {
        records.push(NdefRecord::uri(url));
    }
    records.push(payload_record);

    NdefMessage::new(records).map_err(|e| Error::validation(e.to_string()))
}

/// Populate the convenience content fields from a decoded message.
pub(crate) fn apply_message(card: &mut Card, message: NdefMessage) {
    for record in message.records() {
        if card.plain_text.is_none() {
            if let Some(text) = record.text_content() {
                card.plain_text = Some(text);
                continue;
            }
        }
        if card.uri.is_none() {
            if let Some(uri) = record.uri_content() {
                card.uri = Some(uri);
                continue;
            }
        }
        if card.plain_payload.is_none() && !record.is_text() && !record.is_uri() {
            card.plain_payload = Some(hex::encode(&record.payload));
        }
    }
    card.ndef = Some(message);
}

fn pcsc_err(e: PcscError) -> Error {
    nfc_agent_apdu::TransportError::from(e).into()
}

/// Process-wide card facade; construct once and pass to handlers
pub struct CardService {
    lab: Option<Arc<LabExecutor>>,
    gates: RwLock<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for CardService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardService")
            .field("lab_enabled", &self.lab.is_some())
            .finish_non_exhaustive()
    }
}

impl CardService {
    /// Create the facade; `lab` is present when lab-reader support is
    /// enabled.
    pub fn new(lab: Option<Arc<LabExecutor>>) -> Arc<Self> {
        Arc::new(Self {
            lab,
            gates: RwLock::new(HashMap::new()),
        })
    }

    /// The lab executor, when enabled
    pub fn lab(&self) -> Option<&Arc<LabExecutor>> {
        self.lab.as_ref()
    }

    /// Acquire the serialization gate for a reader. Readers are favored on
    /// the map itself; the gate mutex queues contenders fairly.
    async fn gate(&self, reader_name: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let existing = self
            .gates
            .read()
            .expect("gate map poisoned")
            .get(reader_name)
            .cloned();
        let gate = match existing {
            Some(gate) => gate,
            None => self
                .gates
                .write()
                .expect("gate map poisoned")
                .entry(reader_name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone(),
        };
        gate.lock_owned().await
    }

    fn lab_executor(&self) -> Result<&Arc<LabExecutor>> {
        self.lab
            .as_ref()
            .ok_or_else(|| Error::transport("lab reader support is not enabled"))
    }

    /// Open a PC/SC connection to `reader_name` and run `f` on the
    /// blocking pool. The connection is released with `disposition` on
    /// every exit path.
    async fn with_pcsc<T, F>(&self, reader_name: &str, disposition: Disposition, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PcscTransport) -> Result<T> + Send + 'static,
    {
        let reader_name = reader_name.to_string();
        tokio::task::spawn_blocking(move || {
            let manager = PcscManager::new().map_err(pcsc_err)?;
            let mut transport = manager.connect(&reader_name).map_err(pcsc_err)?;
            transport.set_disposition(disposition);
            f(&mut transport)
        })
        .await
        .map_err(|e| Error::internal(format!("card task failed: {e}")))?
    }

    /// Identify the card and read its contents.
    pub async fn identify(&self, reader_name: &str) -> Result<Card> {
        let _gate = self.gate(reader_name).await;
        if is_lab_reader(reader_name) {
            return lab::identify(self.lab_executor()?).await;
        }
        self.with_pcsc(reader_name, Disposition::Leave, identify_sync)
            .await
    }

    /// Write a typed payload, optionally with a leading URI record.
    pub async fn write(
        &self,
        reader_name: &str,
        data_type: DataType,
        data: &[u8],
        url: Option<&str>,
    ) -> Result<()> {
        let message = build_message(data_type, data, url)?;
        self.write_records(reader_name, message).await
    }

    /// Write a pre-built message.
    pub async fn write_records(&self, reader_name: &str, message: NdefMessage) -> Result<()> {
        let _gate = self.gate(reader_name).await;
        if is_lab_reader(reader_name) {
            return lab::write_ndef(self.lab_executor()?, &message).await;
        }
        self.with_pcsc(reader_name, Disposition::Reset, move |t| {
            with_driver(t, |driver, t| driver.write_ndef(t, &message))
        })
        .await
    }

    /// Erase the stored message.
    pub async fn erase(&self, reader_name: &str) -> Result<()> {
        let _gate = self.gate(reader_name).await;
        if is_lab_reader(reader_name) {
            return lab::erase(self.lab_executor()?).await;
        }
        self.with_pcsc(reader_name, Disposition::Reset, |t| {
            with_driver(t, |driver, t| driver.erase(t))
        })
        .await
    }

    /// Permanently lock the tag. Irreversible.
    pub async fn lock(&self, reader_name: &str) -> Result<()> {
        let _gate = self.gate(reader_name).await;
        if is_lab_reader(reader_name) {
            return lab::lock(self.lab_executor()?).await;
        }
        self.with_pcsc(reader_name, Disposition::Reset, |t| {
            with_driver(t, |driver, t| driver.lock(t))
        })
        .await
    }

    /// Install password protection.
    pub async fn set_password(
        &self,
        reader_name: &str,
        password: [u8; 4],
        pack: [u8; 2],
    ) -> Result<()> {
        let _gate = self.gate(reader_name).await;
        if is_lab_reader(reader_name) {
            return lab::set_password(self.lab_executor()?, password, pack, DEFAULT_AUTH0_PAGE)
                .await;
        }
        self.with_pcsc(reader_name, Disposition::Reset, move |t| {
            with_driver(t, |driver, t| {
                driver.set_password(t, &password, &pack, DEFAULT_AUTH0_PAGE)
            })
        })
        .await
    }

    /// Remove password protection.
    pub async fn clear_password(&self, reader_name: &str, password: [u8; 4]) -> Result<()> {
        let _gate = self.gate(reader_name).await;
        if is_lab_reader(reader_name) {
            return lab::clear_password(self.lab_executor()?, password).await;
        }
        self.with_pcsc(reader_name, Disposition::Reset, move |t| {
            with_driver(t, |driver, t| driver.clear_password(t, &password))
        })
        .await
    }
}

/// Classify the card on the transport and hand the matching driver to `f`.
/// Mutating operations never run against an unclassified tag or one whose
/// capability container is missing.
fn with_driver<T>(
    transport: &mut PcscTransport,
    f: impl FnOnce(&dyn TagDriver, &mut dyn CardTransport) -> Result<T>,
) -> Result<T> {
    let atr = transport.atr()?;
    let class = atr::classify(&atr);

    let driver: Box<dyn TagDriver> = match class.family {
        TagFamily::NtagPage => {
            let probe = PageDriver::probe(transport)?;
            if !probe.cc_valid {
                return Err(Error::unsupported(
                    "capability container missing or invalid; tag is read-only",
                ));
            }
            Box::new(PageDriver::new(probe.variant))
        }
        TagFamily::MifareClassic => Box::new(SectorDriver::new()),
        TagFamily::Iso15693 => Box::new(BlockDriver::new(class.variant)),
        TagFamily::Unknown => {
            return Err(Error::unsupported("unrecognized tag family"));
        }
    };

    f(&*driver, transport)
}

/// The identify + read path: UID, classification, CC refinement, then a
/// best-effort content read.
fn identify_sync(transport: &mut PcscTransport) -> Result<Card> {
    let atr = transport.atr()?;
    let class: Classification = atr::classify(&atr);
    let uid = transport.exchange(&Command::get_uid())?;

    let mut card = Card::bare(
        hex::encode(&uid),
        hex::encode(&atr),
        class.family,
        class.variant,
    );

    let driver: Option<Box<dyn TagDriver>> = match class.family {
        TagFamily::NtagPage => {
            let probe = PageDriver::probe(transport)?;
            card.variant = probe.variant;
            card.capacity_bytes = probe.variant.capacity_bytes();
            card.writable = probe.cc_valid;
            Some(Box::new(PageDriver::new(probe.variant)))
        }
        TagFamily::MifareClassic => Some(Box::new(SectorDriver::new())),
        TagFamily::Iso15693 => Some(Box::new(BlockDriver::new(class.variant))),
        TagFamily::Unknown => {
            card.writable = false;
            None
        }
    };

    if let Some(driver) = driver {
        match driver.read_ndef(transport) {
            Ok(Some(message)) => apply_message(&mut card, message),
            Ok(None) => {}
            Err(e) if matches!(e.kind(), ErrorKind::Parse | ErrorKind::AuthFailed) => {
                // Unreadable content does not fail identification.
                debug!(error = %e, "content read failed during identify");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(card)
}
