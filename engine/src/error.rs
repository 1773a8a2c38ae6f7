use thiserror::Error;

use crate::element::ElementError;
use crate::provision::ProvisionError;
use crate::record::EncodeError;
use crate::store::StoreError;

/// Top-level failure taxonomy of the logging engine.
///
/// `Init` and `Provisioning` are fatal boot classes: without a working key
/// there is no degraded mode and startup must abort. The remaining classes
/// are isolated to the single requested action; the engine stays ready and
/// never retries on its own.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("secure element unreachable: {0}")]
    Init(ElementError),
    #[error("key provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),
    #[error("record encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("log storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    /// Whether this error class aborts startup entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Init(_) | EngineError::Provisioning(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::CommandKind;

    #[test]
    fn boot_classes_are_fatal() {
        let init = EngineError::Init(ElementError::Timeout {
            kind: CommandKind::RandomFill,
            waited_ms: 2000,
        });
        assert!(init.is_fatal());

        let encode = EngineError::Encode(crate::record::EncodeError::PlaintextTooLong { len: 65 });
        assert!(!encode.is_fatal());
    }
}
