//! Reader enumeration
//!
//! Merges the PC/SC reader list with the lab reader's single virtual slot.
//! Secondary (SAM) slots are filtered out; ordinal ids are assigned in
//! list order on every call and carry no persistence.

use std::sync::Arc;

use tracing::{debug, error, info};

use nfc_agent_core::{Reader, ReaderKind};
use nfc_agent_pcsc::PcscManager;
use nfc_agent_proxmark::LabExecutor;

/// Stable id of the lab reader's virtual slot
pub const LAB_READER_ID: &str = "proxmark3-0";
/// Display name of the lab reader's virtual slot
pub const LAB_READER_NAME: &str = "Proxmark3";

/// Whether a reader name addresses the lab reader
pub fn is_lab_reader(reader_name: &str) -> bool {
    reader_name.starts_with(LAB_READER_NAME)
}

/// Whether a reader name looks like a secondary (SAM) slot rather than the
/// contactless interface: a case-insensitive whole-word match of "SAM".
fn is_secondary_slot(reader_name: &str) -> bool {
    reader_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case("sam"))
}

/// Enumerate readers. Always returns a list, never fails: a missing PC/SC
/// stack yields an empty result (plus the lab slot when connected).
pub async fn list_readers(lab: Option<&Arc<LabExecutor>>) -> Vec<Reader> {
    let names = tokio::task::spawn_blocking(|| -> Vec<String> {
        let manager = match PcscManager::new() {
            Ok(manager) => manager,
            Err(e) => {
                error!(error = %e, "failed to establish PC/SC context - is pcscd running?");
                return Vec::new();
            }
        };
        match manager.list_reader_names() {
            Ok(names) => names,
            Err(e) => {
                debug!(error = %e, "no readers found");
                Vec::new()
            }
        }
    })
    .await
    .unwrap_or_default();

    let mut readers: Vec<Reader> = names
        .into_iter()
        .filter(|name| !is_secondary_slot(name))
        .enumerate()
        .map(|(i, name)| Reader {
            id: format!("reader-{i}"),
            name,
            kind: ReaderKind::Picc,
        })
        .collect();

    if let Some(exec) = lab {
        if exec.is_available() && exec.is_connected().await {
            info!("lab reader detected");
            readers.push(Reader {
                id: LAB_READER_ID.to_string(),
                name: LAB_READER_NAME.to_string(),
                kind: ReaderKind::Lab,
            });
        }
    }

    readers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_reader_name_matching() {
        assert!(is_lab_reader("Proxmark3"));
        assert!(is_lab_reader("Proxmark3 (usb)"));
        assert!(!is_lab_reader("ACS ACR122U PICC Interface"));
    }

    #[test]
    fn sam_slots_are_secondary() {
        assert!(is_secondary_slot("ACS ACR1252 Dual Reader SAM"));
        assert!(is_secondary_slot("Reader sam slot 1"));
        assert!(is_secondary_slot("HID SAM-Slot"));
        // "SAM" must match as a whole word.
        assert!(!is_secondary_slot("Samsung Reader"));
        assert!(!is_secondary_slot("ACS ACR122U PICC Interface"));
        assert!(!is_secondary_slot("balsamic"));
    }
}
