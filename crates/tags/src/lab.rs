//! Canonical operations over the lab reader
//!
//! The lab reader has no APDU surface; each operation is re-expressed as
//! the executor's text commands. Identification tries ISO 15693 first and
//! falls back to ISO 14443A, matching the relative probe costs.

use std::sync::Arc;

use nfc_agent_core::ndef::EMPTY_MESSAGE_TLV;
use nfc_agent_core::{Card, Error, NdefMessage, Result, TagFamily};
use nfc_agent_proxmark::{KeyType, LabExecutor};

use crate::driver::{PageGeometry, NFC_KEY_A};
use crate::facade::apply_message;

/// First user page on page-family tags
const USER_START: u8 = 4;

pub(crate) async fn identify(exec: &Arc<LabExecutor>) -> Result<Card> {
    let info = exec.card_info().await.map_err(Error::from)?;
    let (family, variant) = info.kind.classify();
    let mut card = Card::bare(hex::encode(&info.uid), String::new(), family, variant);

    if family == TagFamily::NtagPage {
        match exec.read_ndef().await {
            Ok(raw) => {
                if let Ok(message) = NdefMessage::decode(&raw) {
                    apply_message(&mut card, message);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "lab NDEF read failed during identify");
            }
        }
    }

    Ok(card)
}

pub(crate) async fn write_ndef(exec: &Arc<LabExecutor>, message: &NdefMessage) -> Result<()> {
    let info = exec.card_info().await.map_err(Error::from)?;
    let (family, variant) = info.kind.classify();

    let encoded = message.encode();
    let capacity = variant.capacity_bytes();
    if capacity > 0 && encoded.len() > capacity {
        return Err(Error::bounds(format!(
            "encoded message is {} bytes, capacity is {capacity}",
            encoded.len()
        )));
    }

    let mut padded = encoded.to_vec();
    while padded.len() % 4 != 0 {
        padded.push(0x00);
    }

    match family {
        TagFamily::NtagPage => {
            for (i, chunk) in padded.chunks_exact(4).enumerate() {
                exec.write_mfu_page(USER_START + i as u8, chunk, None)
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        }
        TagFamily::Iso15693 => {
            for (i, chunk) in padded.chunks_exact(4).enumerate() {
                exec.write_iso15693_block(i as u8, chunk)
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        }
        TagFamily::MifareClassic => write_classic(exec, &padded).await,
        TagFamily::Unknown => Err(Error::unsupported("unrecognized tag family")),
    }
}

/// Classic writes go through the MAD, read with the public key, then the
/// NFC Forum key per data sector.
async fn write_classic(exec: &Arc<LabExecutor>, data: &[u8]) -> Result<()> {
    use crate::driver::{parse_mad, MAD_KEY_A};

    let block1 = exec
        .read_mifare_block(1, &MAD_KEY_A, KeyType::A)
        .await
        .map_err(Error::from)?;
    let block2 = exec
        .read_mifare_block(2, &MAD_KEY_A, KeyType::A)
        .await
        .map_err(Error::from)?;
    let (block1, block2) = (
        block1
            .as_slice()
            .try_into()
            .map_err(|_| Error::parse("short MAD block"))?,
        block2
            .as_slice()
            .try_into()
            .map_err(|_| Error::parse("short MAD block"))?,
    );
    let sectors = parse_mad(&block1, &block2);
    if sectors.is_empty() {
        return Err(Error::unsupported(
            "tag has no NDEF sectors in its application directory",
        ));
    }

    let capacity = sectors.len() * 48;
    if data.len() > capacity {
        return Err(Error::bounds(format!(
            "message needs {} bytes, NDEF sectors hold {capacity}",
            data.len()
        )));
    }

    let mut padded = data.to_vec();
    while padded.len() % 16 != 0 {
        padded.push(0x00);
    }

    let mut chunks = padded.chunks_exact(16);
    'sectors: for &sector in &sectors {
        for offset in 0..3u8 {
            let Some(chunk) = chunks.next() else {
                break 'sectors;
            };
            exec.write_mifare_block(sector * 4 + offset, chunk, &NFC_KEY_A, KeyType::A)
                .await
                .map_err(Error::from)?;
        }
    }
    Ok(())
}

pub(crate) async fn erase(exec: &Arc<LabExecutor>) -> Result<()> {
    let info = exec.card_info().await.map_err(Error::from)?;
    let (family, variant) = info.kind.classify();

    match family {
        TagFamily::NtagPage => {
            let geometry = PageGeometry::for_variant(variant);
            exec.write_mfu_page(USER_START, &EMPTY_MESSAGE_TLV, None)
                .await
                .map_err(Error::from)?;
            for page in USER_START + 1..=geometry.user_end {
                exec.write_mfu_page(page, &[0u8; 4], None)
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        }
        TagFamily::Iso15693 => {
            let blocks: u8 = match variant.capacity_bytes() / 4 {
                0 => 28,
                n => n as u8,
            };
            exec.write_iso15693_block(0, &EMPTY_MESSAGE_TLV)
                .await
                .map_err(Error::from)?;
            for block in 1..blocks {
                exec.write_iso15693_block(block, &[0u8; 4])
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        }
        TagFamily::MifareClassic => {
            let mut blank = vec![0u8; 48];
            blank[..4].copy_from_slice(&EMPTY_MESSAGE_TLV);
            write_classic(exec, &blank).await
        }
        TagFamily::Unknown => Err(Error::unsupported("unrecognized tag family")),
    }
}

pub(crate) async fn lock(exec: &Arc<LabExecutor>) -> Result<()> {
    let info = exec.card_info().await.map_err(Error::from)?;
    let (family, variant) = info.kind.classify();
    if family != TagFamily::NtagPage {
        return Err(Error::unsupported(
            "locking through the lab reader is only available for page tags",
        ));
    }

    let geometry = PageGeometry::for_variant(variant);
    let mut lock_page = exec.read_mfu_page(2, None).await.map_err(Error::from)?;
    if lock_page.len() < 4 {
        return Err(Error::parse("short read of lock page"));
    }
    lock_page[2] = 0xFF;
    lock_page[3] = 0xFF;
    exec.write_mfu_page(2, &lock_page[..4], None)
        .await
        .map_err(Error::from)?;

    if let Some(dynamic) = geometry.dynamic_lock {
        exec.write_mfu_page(dynamic, &[0xFF, 0xFF, 0xFF, 0x00], None)
            .await
            .map_err(Error::from)?;
    }
    Ok(())
}

pub(crate) async fn set_password(
    exec: &Arc<LabExecutor>,
    password: [u8; 4],
    pack: [u8; 2],
    start_page: u8,
) -> Result<()> {
    let info = exec.card_info().await.map_err(Error::from)?;
    let (family, variant) = info.kind.classify();
    if family != TagFamily::NtagPage {
        return Err(Error::unsupported(
            "password protection through the lab reader is only available for page tags",
        ));
    }

    let geometry = PageGeometry::for_variant(variant);
    if start_page > geometry.pack {
        return Err(Error::bounds(format!(
            "protection start page {start_page} past end of tag"
        )));
    }

    exec.write_mfu_page(geometry.pwd, &password, None)
        .await
        .map_err(Error::from)?;
    exec.write_mfu_page(geometry.pack, &[pack[0], pack[1], 0x00, 0x00], None)
        .await
        .map_err(Error::from)?;

    let mut cfg = exec
        .read_mfu_page(geometry.cfg, None)
        .await
        .map_err(Error::from)?;
    if cfg.len() < 4 {
        return Err(Error::parse("short read of configuration page"));
    }
    cfg[3] = start_page;
    exec.write_mfu_page(geometry.cfg, &cfg[..4], None)
        .await
        .map_err(Error::from)?;

    // Prove the password took effect with an authenticated read.
    exec.read_mfu_page(geometry.cfg, Some(&password))
        .await
        .map_err(Error::from)?;
    Ok(())
}

pub(crate) async fn clear_password(exec: &Arc<LabExecutor>, password: [u8; 4]) -> Result<()> {
    let info = exec.card_info().await.map_err(Error::from)?;
    let (family, variant) = info.kind.classify();
    if family != TagFamily::NtagPage {
        return Err(Error::unsupported(
            "password protection through the lab reader is only available for page tags",
        ));
    }

    let geometry = PageGeometry::for_variant(variant);
    let mut cfg = exec
        .read_mfu_page(geometry.cfg, Some(&password))
        .await
        .map_err(Error::from)?;
    if cfg.len() < 4 {
        return Err(Error::parse("short read of configuration page"));
    }
    cfg[3] = 0xFF;
    exec.write_mfu_page(geometry.cfg, &cfg[..4], Some(&password))
        .await
        .map_err(Error::from)?;

    exec.write_mfu_page(geometry.pwd, &[0u8; 4], Some(&password))
        .await
        .map_err(Error::from)?;
    exec.write_mfu_page(geometry.pack, &[0u8; 4], Some(&password))
        .await
        .map_err(Error::from)?;
    Ok(())
}
