use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

use super::command::{Command, CommandKind};

/// Interval between polls of the completion cell.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Default deadline for one element operation. A wedged element surfaces as
/// [`ElementError::Timeout`] instead of hanging the caller.
pub const WAIT_DEADLINE: Duration = Duration::from_secs(2);

/// Device status used when the driver signals completion without an outcome.
const STATUS_NO_OUTCOME: u16 = 0xFFFF;

const STATE_BUSY: u8 = 0;
const STATE_DONE: u8 = 1;

/// Shared state of one outstanding operation.
///
/// The driver's completion path stores the outcome first and flips `state`
/// with release ordering; the polling waiter observes the flip with acquire
/// ordering before taking the outcome.
#[derive(Debug)]
struct OperationCell {
    state: AtomicU8,
    outcome: Mutex<Option<Result<Vec<u8>, u16>>>,
}

impl OperationCell {
    fn busy() -> Self {
        Self {
            state: AtomicU8::new(STATE_BUSY),
            outcome: Mutex::new(None),
        }
    }
}

/// Write side of one outstanding operation, handed to the driver at
/// submission. Completion may be signalled from any thread and happens at
/// most once; the handle is consumed by it.
#[derive(Debug)]
pub struct CompletionHandle {
    cell: Arc<OperationCell>,
}

impl CompletionHandle {
    /// Signal success, carrying the element's response payload.
    pub fn succeed(self, payload: Vec<u8>) {
        self.finish(Ok(payload));
    }

    /// Signal failure, carrying the element's status code.
    pub fn fail(self, status: u16) {
        self.finish(Err(status));
    }

    fn finish(self, outcome: Result<Vec<u8>, u16>) {
        // A poisoned lock leaves the cell busy and the waiter times out,
        // which is the same observable outcome as a wedged element.
        if let Ok(mut slot) = self.cell.outcome.lock() {
            *slot = Some(outcome);
            self.cell.state.store(STATE_DONE, Ordering::Release);
        }
    }
}

/// Rejection reported by the driver before an operation starts executing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct SubmitError {
    reason: String,
}

impl SubmitError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Driver for the external secure element.
///
/// `start` forwards one command to the device and returns without blocking.
/// The outcome must eventually be signalled through `done`, possibly from a
/// different execution context than the caller's. A driver that rejects the
/// submission returns `Err` and must not touch `done`.
pub trait ElementDriver {
    fn start(&mut self, command: Command, done: CompletionHandle) -> Result<(), SubmitError>;
}

/// Errors surfaced while driving a single element operation.
#[derive(Debug, Error)]
pub enum ElementError {
    /// The driver refused to start the operation.
    #[error("{kind} submission rejected: {reason}")]
    Rejected { kind: CommandKind, reason: String },
    /// The element completed the operation with an error status.
    #[error("{kind} failed with device status 0x{status:04X}")]
    Device { kind: CommandKind, status: u16 },
    /// The element did not report an outcome before the deadline.
    #[error("{kind} timed out after {waited_ms} ms")]
    Timeout { kind: CommandKind, waited_ms: u64 },
}

/// Blocking facade over the asynchronous element protocol.
///
/// At most one operation is in flight per engine: [`CryptoEngine::submit`]
/// returns a token that holds the engine's mutable borrow until it is waited
/// on, so interleaved submissions do not compile.
#[derive(Debug)]
pub struct CryptoEngine<D> {
    driver: D,
    poll_interval: Duration,
    wait_deadline: Duration,
}

impl<D: ElementDriver> CryptoEngine<D> {
    /// Wrap `driver` with the default poll interval and deadline.
    pub fn new(driver: D) -> Self {
        Self::with_timing(driver, POLL_INTERVAL, WAIT_DEADLINE)
    }

    /// Wrap `driver` with explicit wait timing.
    pub fn with_timing(driver: D, poll_interval: Duration, wait_deadline: Duration) -> Self {
        Self {
            driver,
            poll_interval,
            wait_deadline,
        }
    }

    /// Start one operation. Returns immediately; the element works in the
    /// background until the returned token is waited on.
    pub fn submit(&mut self, command: Command) -> Result<PendingOperation<'_, D>, ElementError> {
        let kind = command.kind();
        let cell = Arc::new(OperationCell::busy());
        let handle = CompletionHandle {
            cell: Arc::clone(&cell),
        };
        self.driver
            .start(command, handle)
            .map_err(|err| ElementError::Rejected {
                kind,
                reason: err.to_string(),
            })?;
        trace!(%kind, "element operation submitted");
        Ok(PendingOperation {
            cell,
            kind,
            poll_interval: self.poll_interval,
            deadline: Instant::now() + self.wait_deadline,
            _engine: PhantomData,
        })
    }

    /// Submit `command` and block until the element reports an outcome.
    pub fn execute(&mut self, command: Command) -> Result<Vec<u8>, ElementError> {
        self.submit(command)?.wait()
    }

    /// Release the wrapped driver. Only possible with no operation in flight,
    /// since a pending token would still hold the engine's borrow.
    pub fn into_driver(self) -> D {
        self.driver
    }
}

/// Token for one in-flight element operation.
///
/// Holds the engine's mutable borrow for its whole lifetime and is consumed
/// by exactly one [`wait`](PendingOperation::wait).
#[must_use = "a submitted operation must be awaited"]
#[derive(Debug)]
pub struct PendingOperation<'engine, D> {
    cell: Arc<OperationCell>,
    kind: CommandKind,
    poll_interval: Duration,
    deadline: Instant,
    _engine: PhantomData<&'engine mut D>,
}

impl<D> PendingOperation<'_, D> {
    /// Busy-poll the completion cell until the driver signals an outcome or
    /// the deadline passes.
    pub fn wait(self) -> Result<Vec<u8>, ElementError> {
        let started = Instant::now();
        while self.cell.state.load(Ordering::Acquire) != STATE_DONE {
            if Instant::now() >= self.deadline {
                return Err(ElementError::Timeout {
                    kind: self.kind,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(self.poll_interval);
        }

        let outcome = self
            .cell
            .outcome
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match outcome {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(status)) => Err(ElementError::Device {
                kind: self.kind,
                status,
            }),
            None => Err(ElementError::Device {
                kind: self.kind,
                status: STATUS_NO_OUTCOME,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::KeySlotId;

    /// Driver scripted with a single behaviour for every command.
    enum Script {
        Succeed(Vec<u8>),
        FailWith(u16),
        Reject,
        NeverComplete,
    }

    struct ScriptedDriver {
        script: Script,
    }

    impl ElementDriver for ScriptedDriver {
        fn start(&mut self, _command: Command, done: CompletionHandle) -> Result<(), SubmitError> {
            match &self.script {
                Script::Succeed(payload) => {
                    let payload = payload.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(2));
                        done.succeed(payload);
                    });
                    Ok(())
                }
                Script::FailWith(status) => {
                    let status = *status;
                    thread::spawn(move || done.fail(status));
                    Ok(())
                }
                Script::Reject => Err(SubmitError::new("element unreachable")),
                Script::NeverComplete => {
                    drop(done);
                    Ok(())
                }
            }
        }
    }

    fn engine(script: Script) -> CryptoEngine<ScriptedDriver> {
        CryptoEngine::with_timing(
            ScriptedDriver { script },
            Duration::from_millis(1),
            Duration::from_millis(50),
        )
    }

    fn probe() -> Command {
        Command::RandomFill { len: 4 }
    }

    #[test]
    fn waits_for_out_of_band_completion() {
        let mut engine = engine(Script::Succeed(vec![1, 2, 3, 4]));
        let payload = engine.execute(probe()).unwrap();
        assert_eq!(payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn device_status_becomes_error() {
        let mut engine = engine(Script::FailWith(0x0107));
        let err = engine.execute(probe()).unwrap_err();
        match err {
            ElementError::Device { kind, status } => {
                assert_eq!(kind, CommandKind::RandomFill);
                assert_eq!(status, 0x0107);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejection_is_immediate() {
        let mut engine = engine(Script::Reject);
        let started = Instant::now();
        let err = engine.execute(probe()).unwrap_err();
        assert!(matches!(err, ElementError::Rejected { .. }));
        assert!(started.elapsed() < Duration::from_millis(40));
    }

    #[test]
    fn silent_element_times_out() {
        let mut engine = engine(Script::NeverComplete);
        let err = engine
            .execute(Command::ReadKeyMetadata {
                slot: KeySlotId(0xE200),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ElementError::Timeout {
                kind: CommandKind::ReadKeyMetadata,
                ..
            }
        ));
    }

    #[test]
    fn engine_is_reusable_after_completion() {
        let mut engine = engine(Script::Succeed(vec![9]));
        assert_eq!(engine.execute(probe()).unwrap(), vec![9]);
        assert_eq!(engine.execute(probe()).unwrap(), vec![9]);
    }
}
