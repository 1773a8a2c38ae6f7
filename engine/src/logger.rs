//! Boot orchestration and the event-facing engine facade.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::element::{
    Command, CryptoEngine, ElementDriver, KeySlotId, POLL_INTERVAL, WAIT_DEADLINE,
};
use crate::error::EngineError;
use crate::provision::{LOG_KEY_SLOT, SlotReadiness, provision};
use crate::record::{self, EventMessage};
use crate::store::{HexDump, LogStore};

/// Engine configuration assembled at boot.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Path of the encrypted log file.
    pub log_path: PathBuf,
    /// Key slot used for record encryption.
    pub key_slot: KeySlotId,
    /// Destructive: regenerate the slot key on boot, overwriting any
    /// existing key and making previously written records undecryptable.
    pub force_regenerate: bool,
    /// Interval between polls while waiting on the element.
    pub poll_interval: Duration,
    /// Deadline for a single element operation.
    pub wait_deadline: Duration,
}

impl LoggerConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            key_slot: LOG_KEY_SLOT,
            force_regenerate: false,
            poll_interval: POLL_INTERVAL,
            wait_deadline: WAIT_DEADLINE,
        }
    }
}

/// The secure logging engine: provisioned element plus append-only store.
///
/// Constructed only through [`SecureLogger::initialize`], so a live logger
/// always has a provisioned key behind it.
#[derive(Debug)]
pub struct SecureLogger<D> {
    engine: CryptoEngine<D>,
    store: LogStore,
    slot: KeySlotId,
    readiness: SlotReadiness,
    seq: u32,
    booted_at: Instant,
}

impl<D: ElementDriver> SecureLogger<D> {
    /// Bring the engine up: probe the element, then provision the key slot.
    ///
    /// Both failure classes are fatal; there is no degraded mode without a
    /// working key.
    pub fn initialize(driver: D, config: LoggerConfig) -> Result<Self, EngineError> {
        let mut engine =
            CryptoEngine::with_timing(driver, config.poll_interval, config.wait_deadline);

        // Reachability probe: one byte from the TRNG. Distinguishes an
        // unreachable element from a provisioning failure.
        engine
            .execute(Command::RandomFill { len: 1 })
            .map_err(EngineError::Init)?;

        let outcome = provision(&mut engine, config.key_slot, config.force_regenerate)?;
        info!(slot = %config.key_slot, ?outcome, "logging key ready");

        Ok(Self {
            engine,
            store: LogStore::new(config.log_path),
            slot: config.key_slot,
            readiness: outcome.readiness(),
            seq: 0,
            booted_at: Instant::now(),
        })
    }

    /// Cached belief about the key slot.
    pub fn slot_readiness(&self) -> SlotReadiness {
        self.readiness
    }

    /// The underlying record store.
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Encrypt `plaintext` into a fresh 80-byte record and append it.
    ///
    /// Encoding failures never reach the store; storage failures are
    /// reported as-is. Either way the engine remains ready for the next
    /// action.
    pub fn append_event(&mut self, plaintext: &[u8]) -> Result<(), EngineError> {
        let record = record::encode(&mut self.engine, self.slot, plaintext)?;
        self.store.append(&record)?;
        Ok(())
    }

    /// Append the periodic event: sequence number plus uptime.
    ///
    /// The sequence number is consumed even when the append fails, so a gap
    /// in the decrypted stream marks a dropped event.
    pub fn append_heartbeat(&mut self) -> Result<EventMessage, EngineError> {
        self.seq = self.seq.wrapping_add(1);
        let message = EventMessage {
            seq: self.seq,
            uptime_ms: self.booted_at.elapsed().as_millis() as u64,
        };
        let text = message.render();
        if let Err(err) = self.append_event(text.as_bytes()) {
            warn!(seq = message.seq, "event discarded: {err}");
            return Err(err);
        }
        info!(%text, "event encrypted and appended");
        Ok(message)
    }

    /// Reset the log file to zero length. Irreversible.
    pub fn clear_log(&mut self) -> Result<(), EngineError> {
        self.store.clear()?;
        Ok(())
    }

    /// Hex dump of the stored records. An absent log file yields an empty
    /// dump; a trailing torn write surfaces as an error item.
    pub fn dump_log(&self) -> Result<HexDump, EngineError> {
        Ok(self.store.dump_hex()?)
    }
}
