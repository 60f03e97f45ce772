//! PC/SC context management and reader listing

use std::ffi::CString;

use pcsc::{Context, Protocols, Scope, ShareMode};
use tracing::debug;

use crate::error::PcscError;
use crate::transport::PcscTransport;

/// Owner of a PC/SC context, acquired per operation
pub struct PcscManager {
    context: Context,
}

impl std::fmt::Debug for PcscManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcscManager").finish_non_exhaustive()
    }
}

impl PcscManager {
    /// Establish a user-scope PC/SC context
    pub fn new() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List the names of all attached readers. An empty system yields an
    /// empty list, not an error.
    pub fn list_reader_names(&self) -> Result<Vec<String>, PcscError> {
        let names = match self.context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => {
                debug!("no PC/SC readers attached");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(names
            .into_iter()
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    /// Connect to the card in `reader_name` with shared access and any
    /// protocol, as the card path requires.
    pub fn connect(self, reader_name: &str) -> Result<PcscTransport, PcscError> {
        let reader_cstr = CString::new(reader_name)
            .map_err(|_| PcscError::ReaderNotFound(reader_name.to_string()))?;

        match self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => Ok(PcscTransport::new(
                self.context,
                card,
                reader_name.to_string(),
            )),
            Err(pcsc::Error::NoSmartcard) => Err(PcscError::NoCard(reader_name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
