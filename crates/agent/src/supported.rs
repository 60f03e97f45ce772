//! Embedded catalog of known-to-work readers

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A reader known to work with the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedReader {
    /// Product name
    pub name: String,
    /// Manufacturer
    pub manufacturer: String,
    /// Short description
    pub description: String,
    /// Tag families it can drive
    pub supported_tags: Vec<String>,
    /// Operations it supports
    pub capabilities: ReaderCapability,
    /// Known limitations
    #[serde(default)]
    pub limitations: Vec<String>,
}

/// The operations a reader can perform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderCapability {
    /// Card reads
    pub read: bool,
    /// Card writes
    pub write: bool,
    /// NDEF handling
    pub ndef: bool,
}

#[derive(Deserialize)]
struct Catalog {
    readers: Vec<SupportedReader>,
}

static CATALOG: Lazy<Vec<SupportedReader>> = Lazy::new(|| {
    let catalog: Catalog = serde_json::from_str(include_str!("../data/supported_readers.json"))
        .expect("embedded reader catalog is valid JSON");
    catalog.readers
});

/// The embedded catalog
pub fn supported_readers() -> &'static [SupportedReader] {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_parses_and_is_nonempty() {
        let readers = supported_readers();
        assert!(!readers.is_empty());
        assert!(readers.iter().any(|r| r.name.contains("ACR122U")));
        assert!(readers.iter().all(|r| r.capabilities.read));
    }
}
