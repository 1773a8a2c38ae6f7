//! In-process software secure element.
//!
//! A stand-in for the external hardware device, implementing the same command
//! contract: TRNG fill, slot metadata read/write, AES-128 key generation into
//! a slot, and AES-128-CBC encryption with the slot-resident key. Keys never
//! leave the element through the command interface.
//!
//! Every command completes on a worker thread, so callers exercise the same
//! out-of-band completion path the real device uses. The slot table can be
//! persisted to a state file so provisioned keys survive process restarts the
//! way a hardware slot survives reboots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use aes::Aes128;
use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::command::{CipherMode, Command, KeySlotId, KeyUsage, SymmetricAlgorithm};
use super::engine::{CompletionHandle, ElementDriver, SubmitError};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Largest random fill the element will serve in one command.
const RANDOM_FILL_MAX: usize = 256;
/// Simulated command latency before the completion callback fires.
const COMPLETION_DELAY: Duration = Duration::from_millis(1);

/// Device status: the slot has no usable key.
pub const STATUS_KEY_MISSING: u16 = 0x8001;
/// Device status: the slot's metadata does not authorize the operation.
pub const STATUS_SLOT_UNINITIALIZED: u16 = 0x8002;
/// Device status: persisting the slot table failed.
pub const STATUS_STORAGE_FAULT: u16 = 0x8003;

/// Contents of one key slot.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SlotRecord {
    metadata: Vec<u8>,
    key: Option<[u8; 16]>,
}

/// Software secure element holding a slot table and a seeded CSPRNG.
pub struct SoftElement {
    slots: Vec<(u16, SlotRecord)>,
    state_path: Option<PathBuf>,
    rng: ChaCha20Rng,
}

impl SoftElement {
    /// Element with an empty slot table and entropy-seeded RNG. State is not
    /// persisted; keys vanish when the element is dropped.
    pub fn ephemeral() -> Self {
        Self {
            slots: Vec::new(),
            state_path: None,
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    /// Element with a deterministic RNG, for reproducible tests.
    pub fn seeded(seed: [u8; 32]) -> Self {
        Self {
            slots: Vec::new(),
            state_path: None,
            rng: ChaCha20Rng::from_seed(seed),
        }
    }

    /// Element whose slot table is loaded from and persisted to `path`.
    ///
    /// A missing file starts an empty table; it is created on the first
    /// mutating command.
    pub fn with_state_file(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let slots = match fs::read(&path) {
            Ok(bytes) => postcard::from_bytes(&bytes)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            slots,
            state_path: Some(path),
            rng: ChaCha20Rng::from_entropy(),
        })
    }

    /// Path of the persisted slot table, when one is configured.
    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    fn slot(&self, id: KeySlotId) -> Option<&SlotRecord> {
        self.slots
            .iter()
            .find(|(slot, _)| *slot == id.0)
            .map(|(_, record)| record)
    }

    fn slot_mut(&mut self, id: KeySlotId) -> &mut SlotRecord {
        let index = match self.slots.iter().position(|(slot, _)| *slot == id.0) {
            Some(index) => index,
            None => {
                self.slots.push((
                    id.0,
                    SlotRecord {
                        metadata: Vec::new(),
                        key: None,
                    },
                ));
                self.slots.len() - 1
            }
        };
        &mut self.slots[index].1
    }

    fn persist(&self) -> Result<(), u16> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let encoded = postcard::to_allocvec(&self.slots).map_err(|_| STATUS_STORAGE_FAULT)?;
        fs::write(path, encoded).map_err(|_| STATUS_STORAGE_FAULT)
    }

    /// Execute one command against the slot table. `Err(SubmitError)` models
    /// the device rejecting malformed parameters up front; the inner result
    /// is what the completion callback will carry.
    fn process(&mut self, command: Command) -> Result<Result<Vec<u8>, u16>, SubmitError> {
        match command {
            Command::RandomFill { len } => {
                if len == 0 || len > RANDOM_FILL_MAX {
                    return Err(SubmitError::new(format!("invalid random length {len}")));
                }
                let mut bytes = vec![0u8; len];
                self.rng.fill_bytes(&mut bytes);
                Ok(Ok(bytes))
            }
            Command::ReadKeyMetadata { slot } => {
                let blob = self
                    .slot(slot)
                    .map(|record| record.metadata.clone())
                    .unwrap_or_default();
                Ok(Ok(blob))
            }
            Command::WriteKeyMetadata { slot, blob } => {
                if blob.is_empty() {
                    return Err(SubmitError::new("empty metadata blob"));
                }
                self.slot_mut(slot).metadata = blob;
                Ok(self.persist().map(|()| Vec::new()))
            }
            Command::GenerateSymmetricKey {
                slot,
                algorithm: SymmetricAlgorithm::Aes128,
                usage: KeyUsage::Encryption,
                exportable,
            } => {
                if exportable {
                    return Err(SubmitError::new("exportable keys are not supported"));
                }
                if self.slot(slot).is_none_or(|record| record.metadata.is_empty()) {
                    return Ok(Err(STATUS_SLOT_UNINITIALIZED));
                }
                let mut key = [0u8; 16];
                self.rng.fill_bytes(&mut key);
                self.slot_mut(slot).key = Some(key);
                debug!(%slot, "generated AES-128 key");
                Ok(self.persist().map(|()| Vec::new()))
            }
            Command::SymmetricEncrypt {
                slot,
                mode: CipherMode::Cbc,
                iv,
                aad,
                plaintext,
            } => {
                if !aad.is_empty() {
                    return Err(SubmitError::new("CBC mode carries no associated data"));
                }
                if plaintext.is_empty() || plaintext.len() % 16 != 0 {
                    return Err(SubmitError::new(format!(
                        "plaintext length {} is not a positive multiple of the block size",
                        plaintext.len()
                    )));
                }
                let Some(key) = self.slot(slot).and_then(|record| record.key) else {
                    return Ok(Err(STATUS_KEY_MISSING));
                };
                let cipher = Aes128CbcEnc::new_from_slices(&key, &iv)
                    .map_err(|err| SubmitError::new(err.to_string()))?;
                let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&plaintext);
                Ok(Ok(ciphertext))
            }
        }
    }
}

impl ElementDriver for SoftElement {
    fn start(&mut self, command: Command, done: CompletionHandle) -> Result<(), SubmitError> {
        let outcome = self.process(command)?;
        // Deliver the outcome from a worker thread, matching the out-of-band
        // completion callback of the real device.
        thread::spawn(move || {
            thread::sleep(COMPLETION_DELAY);
            match outcome {
                Ok(payload) => done.succeed(payload),
                Err(status) => done.fail(status),
            }
        });
        Ok(())
    }
}
