//! Typed card operations over the executor
//!
//! Each operation renders the exact text command the client expects and
//! parses the free-form reply. Identify tries ISO 15693 first because it is
//! the faster probe, then falls back to ISO 14443A.

use std::sync::Arc;

use crate::error::LabError;
use crate::executor::LabExecutor;
use crate::parser::{
    is_write_success, parse_block_data, parse_hf14a_info, parse_hf15_info, parse_mfu_page,
    parse_ndef_dump, LabCardInfo,
};

/// MIFARE key types for sector authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Key A
    A,
    /// Key B
    B,
}

impl KeyType {
    const fn flag(self) -> &'static str {
        match self {
            Self::A => "-a",
            Self::B => "-b",
        }
    }
}

impl LabExecutor {
    /// Identify the card on the reader.
    pub async fn card_info(self: &Arc<Self>) -> Result<LabCardInfo, LabError> {
        let err15 = match self.execute("hf 15 reader").await {
            Ok(output) => match parse_hf15_info(&output) {
                Ok(info) => return Ok(info),
                Err(e) => e,
            },
            Err(e) => e,
        };

        match self.execute("hf 14a reader").await {
            Ok(output) => {
                if let Ok(info) = parse_hf14a_info(&output) {
                    return Ok(info);
                }
                Err(LabError::NoCard)
            }
            Err(LabError::NoCard) => Err(match err15 {
                LabError::NoCard => LabError::NoCard,
                other => other,
            }),
            Err(e) => Err(e),
        }
    }

    /// Read a 16-byte block from a MIFARE Classic card.
    pub async fn read_mifare_block(
        self: &Arc<Self>,
        block: u8,
        key: &[u8],
        key_type: KeyType,
    ) -> Result<Vec<u8>, LabError> {
        if key.len() != 6 {
            return Err(LabError::InvalidArgument("MIFARE key must be 6 bytes"));
        }
        let cmd = format!(
            "hf mf rdbl --blk {} -k {} {}",
            block,
            hex::encode(key),
            key_type.flag()
        );
        let output = self.execute(&cmd).await?;
        parse_block_data(&output)
    }

    /// Write a 16-byte block to a MIFARE Classic card.
    pub async fn write_mifare_block(
        self: &Arc<Self>,
        block: u8,
        data: &[u8],
        key: &[u8],
        key_type: KeyType,
    ) -> Result<(), LabError> {
        if data.len() != 16 {
            return Err(LabError::InvalidArgument("MIFARE block must be 16 bytes"));
        }
        if key.len() != 6 {
            return Err(LabError::InvalidArgument("MIFARE key must be 6 bytes"));
        }
        let cmd = format!(
            "hf mf wrbl --blk {} -k {} {} -d {}",
            block,
            hex::encode(key),
            key_type.flag(),
            hex::encode(data)
        );
        let output = self.execute_fast(&cmd).await?;
        if !is_write_success(&output) {
            return Err(LabError::WriteFailed(output.trim().to_string()));
        }
        Ok(())
    }

    /// Read a 4-byte page from an Ultralight/NTAG card.
    pub async fn read_mfu_page(
        self: &Arc<Self>,
        page: u8,
        password: Option<&[u8]>,
    ) -> Result<Vec<u8>, LabError> {
        let cmd = match password {
            Some(pwd) if pwd.len() == 4 => {
                format!("hf mfu rdbl -b {} -k {}", page, hex::encode(pwd))
            }
            _ => format!("hf mfu rdbl -b {page}"),
        };
        let output = self.execute(&cmd).await?;
        parse_mfu_page(&output)
    }

    /// Write a 4-byte page to an Ultralight/NTAG card.
    pub async fn write_mfu_page(
        self: &Arc<Self>,
        page: u8,
        data: &[u8],
        password: Option<&[u8]>,
    ) -> Result<(), LabError> {
        if data.len() != 4 {
            return Err(LabError::InvalidArgument("page data must be 4 bytes"));
        }
        let cmd = match password {
            Some(pwd) if pwd.len() == 4 => format!(
                "hf mfu wrbl -b {} -d {} -k {}",
                page,
                hex::encode(data),
                hex::encode(pwd)
            ),
            _ => format!("hf mfu wrbl -b {} -d {}", page, hex::encode(data)),
        };
        let output = self.execute_fast(&cmd).await?;
        if !is_write_success(&output) {
            return Err(LabError::WriteFailed(output.trim().to_string()));
        }
        Ok(())
    }

    /// Read the raw NDEF bytes from an Ultralight/NTAG card.
    pub async fn read_ndef(self: &Arc<Self>) -> Result<Vec<u8>, LabError> {
        let output = self.execute("hf mfu ndefread").await?;
        parse_ndef_dump(&output)
    }

    /// Write a 4-byte block to an ISO 15693 tag, scanning for the tag.
    pub async fn write_iso15693_block(
        self: &Arc<Self>,
        block: u8,
        data: &[u8],
    ) -> Result<(), LabError> {
        if data.len() != 4 {
            return Err(LabError::InvalidArgument("ISO 15693 block must be 4 bytes"));
        }
        let cmd = format!(
            "hf 15 wrbl -* -b {} -d {}",
            block,
            hex::encode_upper(data)
        );
        let output = self.execute_fast(&cmd).await?;
        let lower = output.to_lowercase();
        if lower.contains("error") || lower.contains("failed") || lower.contains("no tag found") {
            return Err(LabError::WriteFailed(output.trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_flags() {
        assert_eq!(KeyType::A.flag(), "-a");
        assert_eq!(KeyType::B.flag(), "-b");
    }

    #[tokio::test]
    async fn argument_validation_precedes_io() {
        let exec = LabExecutor::new(crate::LabConfig {
            binary_path: "/nonexistent/pm3".into(),
            ..Default::default()
        });
        assert!(matches!(
            exec.write_mfu_page(4, &[0u8; 3], None).await,
            Err(LabError::InvalidArgument(_))
        ));
        assert!(matches!(
            exec.write_iso15693_block(0, &[0u8; 5]).await,
            Err(LabError::InvalidArgument(_))
        ));
        assert!(matches!(
            exec.read_mifare_block(4, &[0u8; 4], KeyType::A).await,
            Err(LabError::InvalidArgument(_))
        ));
        assert!(matches!(
            exec.write_mifare_block(4, &[0u8; 16], &[0u8; 5], KeyType::B).await,
            Err(LabError::InvalidArgument(_))
        ));
    }
}
