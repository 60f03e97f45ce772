//! Card transport over a PC/SC connection

use bytes::Bytes;
use nfc_agent_apdu::{CardTransport, Disposition, TransportError};
use pcsc::{Card, Context};
use tracing::trace;

use crate::error::PcscError;

/// A live connection to one card in one reader. The context is held for
/// the connection's lifetime; releasing it would invalidate the card
/// handle.
pub struct PcscTransport {
    _context: Context,
    card: Option<Card>,
    reader_name: String,
    disposition: Disposition,
}

impl std::fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("disposition", &self.disposition)
            .finish()
    }
}

impl PcscTransport {
    pub(crate) fn new(context: Context, card: Card, reader_name: String) -> Self {
        Self {
            _context: context,
            card: Some(card),
            reader_name,
            disposition: Disposition::Leave,
        }
    }

    /// The reader this transport is connected through
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Choose what happens to the card on release. Writes reset the card so
    /// a following read observes the stored state, plain reads leave it.
    pub fn set_disposition(&mut self, disposition: Disposition) {
        self.disposition = disposition;
    }

    fn card(&mut self) -> Result<&mut Card, PcscError> {
        self.card
            .as_mut()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))
    }
}

impl CardTransport for PcscTransport {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let reader_name = self.reader_name.clone();
        let card = self.card().map_err(TransportError::from)?;

        let mut response_buffer = [0u8; 258];
        match card.transmit(command, &mut response_buffer) {
            Ok(response) => {
                trace!(reader = %reader_name, len = response.len(), "APDU exchange");
                Ok(Bytes::copy_from_slice(response))
            }
            Err(e @ (pcsc::Error::ResetCard | pcsc::Error::RemovedCard)) => {
                self.card = None;
                Err(PcscError::Pcsc(e).into())
            }
            Err(e) => Err(PcscError::Pcsc(e).into()),
        }
    }

    fn atr(&mut self) -> Result<Bytes, TransportError> {
        let card = self.card().map_err(TransportError::from)?;
        card.get_attribute_owned(pcsc::Attribute::AtrString)
            .map(Bytes::from)
            .map_err(|e| PcscError::Pcsc(e).into())
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let disposition = match self.disposition {
                Disposition::Leave => pcsc::Disposition::LeaveCard,
                Disposition::Reset => pcsc::Disposition::ResetCard,
            };
            let _ = card.disconnect(disposition);
        }
    }
}
