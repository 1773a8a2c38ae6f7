//! Synchronous facade over the secure element's asynchronous command protocol.
//!
//! The secure element executes every operation asynchronously and reports the
//! outcome through a completion callback that may run on another thread. This
//! module bridges that protocol into blocking calls: [`CryptoEngine::submit`]
//! hands back a [`PendingOperation`] token that borrows the engine mutably and
//! must be consumed by exactly one [`PendingOperation::wait`], so a second
//! submission before the first outcome is a compile error rather than a
//! runtime hazard.

mod command;
mod engine;
pub mod soft;

pub use command::{CipherMode, Command, CommandKind, KeySlotId, KeyUsage, SymmetricAlgorithm};
pub use engine::{
    CompletionHandle, CryptoEngine, ElementDriver, ElementError, PendingOperation, SubmitError,
    POLL_INTERVAL, WAIT_DEADLINE,
};
