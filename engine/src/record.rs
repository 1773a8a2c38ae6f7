//! Fixed-format encrypted record codec.
//!
//! A record is `iv(16) || ciphertext(64)`, 80 bytes total. The plaintext is
//! zero-padded to 64 bytes before encryption and no length field is carried,
//! so an off-device consumer cannot distinguish trailing zero bytes from
//! padding. No authentication tag is computed: the format is
//! confidentiality-only, and adding integrity later is a format change.

use serde::Serialize;
use thiserror::Error;

use crate::element::{CipherMode, Command, CryptoEngine, ElementDriver, ElementError, KeySlotId};

/// Length of the per-record initialization vector.
pub const IV_LEN: usize = 16;
/// Upper bound on the plaintext; shorter messages are zero-padded to this.
pub const PLAINTEXT_MAX: usize = 64;
/// Total on-disk record size.
pub const RECORD_LEN: usize = IV_LEN + PLAINTEXT_MAX;

/// One encrypted log record. Immutable once built; the store only ever
/// appends whole records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    iv: [u8; IV_LEN],
    ciphertext: [u8; PLAINTEXT_MAX],
}

impl LogRecord {
    /// Assemble a record from its two fixed-size parts. The engine only
    /// builds records through [`encode`]; this exists for tooling that
    /// re-reads the flat file.
    pub fn from_parts(iv: [u8; IV_LEN], ciphertext: [u8; PLAINTEXT_MAX]) -> Self {
        Self { iv, ciphertext }
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8; PLAINTEXT_MAX] {
        &self.ciphertext
    }

    /// Serialize as `iv || ciphertext`.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[..IV_LEN].copy_from_slice(&self.iv);
        bytes[IV_LEN..].copy_from_slice(&self.ciphertext);
        bytes
    }
}

/// Per-record encoding failures. Each aborts only the record being built;
/// nothing partial ever reaches the store.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("plaintext length {len} exceeds the {PLAINTEXT_MAX}-byte limit")]
    PlaintextTooLong { len: usize },
    #[error("random IV unavailable: {0}")]
    RandomnessUnavailable(ElementError),
    #[error("secure element returned {len} random bytes instead of {IV_LEN}")]
    ShortRandomness { len: usize },
    #[error("encryption failed: {0}")]
    Encryption(ElementError),
    #[error("unexpected ciphertext length {len}")]
    UnexpectedCiphertextLength { len: usize },
}

/// Encrypt `plaintext` into a fresh record using the key resident in `slot`.
///
/// A fresh element-sourced IV is mandatory for every record; IV reuse under
/// the same key breaks the chaining mode, so a failed fill aborts encoding
/// rather than falling back to anything reusable.
pub fn encode<D: ElementDriver>(
    engine: &mut CryptoEngine<D>,
    slot: KeySlotId,
    plaintext: &[u8],
) -> Result<LogRecord, EncodeError> {
    if plaintext.len() > PLAINTEXT_MAX {
        return Err(EncodeError::PlaintextTooLong {
            len: plaintext.len(),
        });
    }

    let random = engine
        .execute(Command::RandomFill { len: IV_LEN })
        .map_err(EncodeError::RandomnessUnavailable)?;
    let iv: [u8; IV_LEN] = random
        .as_slice()
        .try_into()
        .map_err(|_| EncodeError::ShortRandomness { len: random.len() })?;

    let mut padded = [0u8; PLAINTEXT_MAX];
    padded[..plaintext.len()].copy_from_slice(plaintext);

    let returned = engine
        .execute(Command::SymmetricEncrypt {
            slot,
            mode: CipherMode::Cbc,
            iv,
            aad: Vec::new(),
            plaintext: padded.to_vec(),
        })
        .map_err(EncodeError::Encryption)?;
    let ciphertext: [u8; PLAINTEXT_MAX] = returned
        .as_slice()
        .try_into()
        .map_err(|_| EncodeError::UnexpectedCiphertextLength {
            len: returned.len(),
        })?;

    Ok(LogRecord { iv, ciphertext })
}

/// Plaintext event payload: sequence number plus uptime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventMessage {
    pub seq: u32,
    pub uptime_ms: u64,
}

impl EventMessage {
    /// Render the `{"seq":N,"uptime_ms":M}` wire text.
    ///
    /// Always fits [`PLAINTEXT_MAX`]: the fixed skeleton is 21 bytes and the
    /// widest `u32` plus `u64` renderings add 30 more.
    pub fn render(&self) -> String {
        format!("{{\"seq\":{},\"uptime_ms\":{}}}", self.seq, self.uptime_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{CompletionHandle, SubmitError};

    /// Stub element: sequential IV bytes, ciphertext = plaintext XOR 0xFF.
    struct XorElement {
        next_iv_byte: u8,
        fail_rng: bool,
        ciphertext_len: usize,
    }

    impl XorElement {
        fn new() -> Self {
            Self {
                next_iv_byte: 0,
                fail_rng: false,
                ciphertext_len: PLAINTEXT_MAX,
            }
        }
    }

    impl ElementDriver for XorElement {
        fn start(&mut self, command: Command, done: CompletionHandle) -> Result<(), SubmitError> {
            match command {
                Command::RandomFill { len } => {
                    if self.fail_rng {
                        done.fail(0x0201);
                        return Ok(());
                    }
                    let start = self.next_iv_byte;
                    let bytes: Vec<u8> =
                        (0..len).map(|i| start.wrapping_add(i as u8)).collect();
                    self.next_iv_byte = self.next_iv_byte.wrapping_add(len as u8);
                    done.succeed(bytes);
                }
                Command::SymmetricEncrypt { plaintext, .. } => {
                    let mut ciphertext: Vec<u8> =
                        plaintext.iter().map(|byte| byte ^ 0xFF).collect();
                    ciphertext.truncate(self.ciphertext_len);
                    done.succeed(ciphertext);
                }
                other => panic!("unexpected command: {:?}", other.kind()),
            }
            Ok(())
        }
    }

    const SLOT: KeySlotId = KeySlotId(0xE200);

    fn engine() -> CryptoEngine<XorElement> {
        CryptoEngine::new(XorElement::new())
    }

    #[test]
    fn record_is_exactly_eighty_bytes() {
        let mut engine = engine();
        let record = encode(&mut engine, SLOT, b"hello").unwrap();
        assert_eq!(record.to_bytes().len(), RECORD_LEN);
    }

    #[test]
    fn end_to_end_example_vector() {
        // Stub RNG yields iv = 0x00..0x0F; stub cipher XORs with 0xFF.
        let mut engine = engine();
        let plaintext = br#"{"seq":1,"uptime_ms":532}"#;
        assert_eq!(plaintext.len(), 25);

        let record = encode(&mut engine, SLOT, plaintext).unwrap();
        let bytes = record.to_bytes();

        let expected_iv: Vec<u8> = (0u8..16).collect();
        assert_eq!(&bytes[..16], expected_iv.as_slice());
        for (offset, byte) in plaintext.iter().enumerate() {
            assert_eq!(bytes[16 + offset], byte ^ 0xFF);
        }
        // Padding bytes encrypt to 0x00 ^ 0xFF.
        assert!(bytes[16 + plaintext.len()..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn successive_records_use_fresh_ivs() {
        let mut engine = engine();
        let first = encode(&mut engine, SLOT, b"a").unwrap();
        let second = encode(&mut engine, SLOT, b"a").unwrap();
        assert_ne!(first.iv(), second.iv());
    }

    #[test]
    fn oversized_plaintext_is_rejected() {
        let mut engine = engine();
        let plaintext = [0u8; PLAINTEXT_MAX + 1];
        let err = encode(&mut engine, SLOT, &plaintext).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::PlaintextTooLong {
                len
            } if len == PLAINTEXT_MAX + 1
        ));
    }

    #[test]
    fn exactly_sixty_four_bytes_is_accepted() {
        let mut engine = engine();
        let plaintext = [0x41u8; PLAINTEXT_MAX];
        let record = encode(&mut engine, SLOT, &plaintext).unwrap();
        assert!(record.ciphertext().iter().all(|&b| b == 0x41 ^ 0xFF));
    }

    #[test]
    fn rng_failure_aborts_encoding() {
        let mut engine = CryptoEngine::new(XorElement {
            fail_rng: true,
            ..XorElement::new()
        });
        let err = encode(&mut engine, SLOT, b"x").unwrap_err();
        assert!(matches!(err, EncodeError::RandomnessUnavailable(_)));
    }

    #[test]
    fn ciphertext_length_mismatch_discards_the_record() {
        let mut engine = CryptoEngine::new(XorElement {
            ciphertext_len: 63,
            ..XorElement::new()
        });
        let err = encode(&mut engine, SLOT, b"x").unwrap_err();
        assert!(matches!(
            err,
            EncodeError::UnexpectedCiphertextLength { len: 63 }
        ));
    }

    #[test]
    fn message_renders_without_whitespace() {
        let message = EventMessage {
            seq: 1,
            uptime_ms: 532,
        };
        assert_eq!(message.render(), r#"{"seq":1,"uptime_ms":532}"#);
    }

    #[test]
    fn message_rendering_matches_serde_json() {
        let message = EventMessage {
            seq: u32::MAX,
            uptime_ms: u64::MAX,
        };
        let rendered = message.render();
        assert_eq!(rendered, serde_json::to_string(&message).unwrap());
        assert!(rendered.len() <= PLAINTEXT_MAX);
    }
}
