//! Confidentiality-protected append-only event logging backed by an external
//! secure element.
//!
//! All key material lives inside the element and never crosses the command
//! interface; the host submits asynchronous commands (random fill, slot
//! metadata access, key generation, symmetric encryption) and blocks on their
//! completion through the [`element`] adapter. At boot the [`provision`]
//! state machine establishes an AES-128 key in the log slot, after which the
//! [`record`] codec turns bounded plaintext events into fixed 80-byte
//! `iv || ciphertext` records that the [`store`] appends to a flat file.
//!
//! Records carry no authentication tag: the format protects confidentiality
//! only, and an adversary with write access to storage can flip ciphertext
//! bits undetected. Decryption happens off-device by a holder of the key.

pub mod element;
pub mod error;
pub mod logger;
pub mod provision;
pub mod record;
pub mod store;

pub use element::{Command, CryptoEngine, ElementDriver, ElementError, KeySlotId};
pub use error::EngineError;
pub use logger::{LoggerConfig, SecureLogger};
pub use provision::{LOG_KEY_SLOT, ProvisionOutcome, SlotReadiness, SYMMETRIC_KEY_METADATA};
pub use record::{EncodeError, EventMessage, IV_LEN, LogRecord, PLAINTEXT_MAX, RECORD_LEN};
pub use store::{HexDump, LogStore, StoreError};
