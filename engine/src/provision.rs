//! Boot-time key provisioning for the log encryption slot.
//!
//! Runs once per boot and either accepts the key already resident in the
//! slot or writes the slot's capability metadata and generates a fresh
//! AES-128 key inside the element. Any write or generation failure is fatal;
//! there is no partial-provisioning recovery.

use thiserror::Error;
use tracing::{info, warn};

use crate::element::{
    Command, CryptoEngine, ElementDriver, ElementError, KeySlotId, KeyUsage, SymmetricAlgorithm,
};

/// Key slot that holds the log encryption key.
pub const LOG_KEY_SLOT: KeySlotId = KeySlotId(0xE200);

/// Capability blob written to the slot before key generation: symmetric-key
/// usage with change-by-secret semantics.
pub const SYMMETRIC_KEY_METADATA: [u8; 8] = [0x20, 0x06, 0xD0, 0x01, 0x00, 0xD3, 0x01, 0x00];

/// Host-side belief about the provisioned slot.
///
/// The existence check only proves that metadata is present, so `KeyPresent`
/// can be a false positive for a slot that was never key-filled; the mismatch
/// surfaces as an encrypt-time device error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotReadiness {
    #[default]
    Unknown,
    MetadataOnly,
    KeyPresent,
}

/// How the slot became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Non-empty metadata was found; the resident key is used unchanged.
    ExistingKey,
    /// The slot was empty; metadata was written and a fresh key generated.
    Generated,
    /// The destructive policy overwrote whatever occupied the slot.
    Regenerated,
}

impl ProvisionOutcome {
    /// Readiness belief this outcome justifies.
    pub fn readiness(self) -> SlotReadiness {
        SlotReadiness::KeyPresent
    }
}

/// Fatal provisioning failures. Boot must abort on any of these.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("metadata write for slot {slot} failed: {source}")]
    WriteMetadata {
        slot: KeySlotId,
        source: ElementError,
    },
    #[error("key generation for slot {slot} failed: {source}")]
    GenerateKey {
        slot: KeySlotId,
        source: ElementError,
    },
}

enum State {
    CheckExisting,
    WriteMetadata { destructive: bool },
    GenerateKey { destructive: bool },
    Ready(ProvisionOutcome),
}

/// Ensure a usable encryption key occupies `slot`.
///
/// With `force_regenerate` the existence check is skipped and the slot is
/// overwritten unconditionally. This is intentionally destructive.
pub fn provision<D: ElementDriver>(
    engine: &mut CryptoEngine<D>,
    slot: KeySlotId,
    force_regenerate: bool,
) -> Result<ProvisionOutcome, ProvisionError> {
    let mut state = if force_regenerate {
        warn!(%slot, "force-regenerate enabled, existing key will be overwritten");
        State::WriteMetadata { destructive: true }
    } else {
        State::CheckExisting
    };

    loop {
        state = match state {
            State::CheckExisting => match existing_metadata_len(engine, slot) {
                Some(len) => {
                    info!(%slot, metadata_len = len, "using existing key");
                    State::Ready(ProvisionOutcome::ExistingKey)
                }
                None => {
                    info!(%slot, "key slot not provisioned, initializing");
                    State::WriteMetadata { destructive: false }
                }
            },
            State::WriteMetadata { destructive } => {
                engine
                    .execute(Command::WriteKeyMetadata {
                        slot,
                        blob: SYMMETRIC_KEY_METADATA.to_vec(),
                    })
                    .map_err(|source| ProvisionError::WriteMetadata { slot, source })?;
                State::GenerateKey { destructive }
            }
            State::GenerateKey { destructive } => {
                info!(%slot, "generating AES-128 key inside the secure element");
                engine
                    .execute(Command::GenerateSymmetricKey {
                        slot,
                        algorithm: SymmetricAlgorithm::Aes128,
                        usage: KeyUsage::Encryption,
                        exportable: false,
                    })
                    .map_err(|source| ProvisionError::GenerateKey { slot, source })?;
                State::Ready(if destructive {
                    ProvisionOutcome::Regenerated
                } else {
                    ProvisionOutcome::Generated
                })
            }
            State::Ready(outcome) => return Ok(outcome),
        };
    }
}

/// Weak existence check: a readable, non-empty metadata blob is taken as
/// proof of a usable key. A read failure is treated as an unprovisioned
/// slot, not a fatal error.
fn existing_metadata_len<D: ElementDriver>(
    engine: &mut CryptoEngine<D>,
    slot: KeySlotId,
) -> Option<usize> {
    match engine.execute(Command::ReadKeyMetadata { slot }) {
        Ok(blob) if !blob.is_empty() => Some(blob.len()),
        Ok(_) => None,
        Err(err) => {
            info!(%slot, error = %err, "metadata read failed, treating slot as unprovisioned");
            None
        }
    }
}
