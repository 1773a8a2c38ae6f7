use core::fmt;

use crate::record::IV_LEN;

/// Identifier of a key-storage location inside the secure element.
///
/// The host never holds the key itself, only this identifier and a cached
/// belief about the slot's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySlotId(pub u16);

impl fmt::Display for KeySlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Symmetric key algorithms the element can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetricAlgorithm {
    Aes128,
}

/// Block cipher chaining modes the element can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Cbc,
}

/// Usage rights requested for a generated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Encryption,
}

/// One request to the secure element.
///
/// Whatever the variant, the element answers with a byte payload (possibly
/// empty) or a device status code, delivered through the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fill `len` bytes from the element's true random number generator.
    RandomFill { len: usize },
    /// Read the capability/usage metadata stored for `slot`.
    ReadKeyMetadata { slot: KeySlotId },
    /// Replace the capability/usage metadata stored for `slot`.
    WriteKeyMetadata { slot: KeySlotId, blob: Vec<u8> },
    /// Generate a symmetric key directly inside `slot`.
    GenerateSymmetricKey {
        slot: KeySlotId,
        algorithm: SymmetricAlgorithm,
        usage: KeyUsage,
        exportable: bool,
    },
    /// Encrypt `plaintext` with the key resident in `slot`.
    SymmetricEncrypt {
        slot: KeySlotId,
        mode: CipherMode,
        iv: [u8; IV_LEN],
        aad: Vec<u8>,
        plaintext: Vec<u8>,
    },
}

impl Command {
    /// The operation class, used in logs and error reports.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::RandomFill { .. } => CommandKind::RandomFill,
            Command::ReadKeyMetadata { .. } => CommandKind::ReadKeyMetadata,
            Command::WriteKeyMetadata { .. } => CommandKind::WriteKeyMetadata,
            Command::GenerateSymmetricKey { .. } => CommandKind::GenerateSymmetricKey,
            Command::SymmetricEncrypt { .. } => CommandKind::SymmetricEncrypt,
        }
    }
}

/// Operation classes understood by the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    RandomFill,
    ReadKeyMetadata,
    WriteKeyMetadata,
    GenerateSymmetricKey,
    SymmetricEncrypt,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CommandKind::RandomFill => "random-fill",
            CommandKind::ReadKeyMetadata => "read-key-metadata",
            CommandKind::WriteKeyMetadata => "write-key-metadata",
            CommandKind::GenerateSymmetricKey => "generate-symmetric-key",
            CommandKind::SymmetricEncrypt => "symmetric-encrypt",
        };
        f.write_str(label)
    }
}
