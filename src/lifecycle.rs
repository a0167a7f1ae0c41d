//! Lifecycle states shared by sessions, servers, and clients.
//!
//! Every stateful object in the crate moves through the same five states:
//!
//! ```text
//! None -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! Transitions are performed with a single compare-and-swap on a
//! [`StateCell`], so concurrent callers race safely and exactly one of them
//! wins each edge. `Stopped` is terminal.

use std::{fmt, io};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU8, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Position of an object within its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Created but never started, or reverted after a failed start.
    None = 0,
    /// A caller won the start transition and is running setup.
    Starting = 1,
    /// Fully operational.
    Running = 2,
    /// A caller won the stop transition and is tearing down.
    Stopping = 3,
    /// Terminal. The object is never reused.
    Stopped = 4,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Returns `true` once the object has begun or finished shutting down.
    #[must_use]
    pub const fn is_winding_down(self) -> bool { matches!(self, Self::Stopping | Self::Stopped) }

    /// Returns `true` for the terminal [`LifecycleState::Stopped`] state.
    #[must_use]
    pub const fn is_terminal(self) -> bool { matches!(self, Self::Stopped) }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Errors raised by lifecycle transitions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The operation is not valid from the current state.
    #[error("invalid lifecycle state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: LifecycleState,
        /// State that was observed.
        actual: LifecycleState,
    },
    /// The object has been stopped and can never be used again.
    #[error("object has reached its terminal state")]
    Terminated,
    /// A required collaborator was not configured before start.
    #[error("required collaborator missing: {0}")]
    ConfigurationMissing(&'static str),
    /// Setup failed while acquiring an I/O resource.
    #[error("I/O error during setup: {0}")]
    Io(#[from] io::Error),
}

impl LifecycleError {
    /// Build the error reported when a transition from `expected` loses
    /// because the object is actually in `actual`.
    #[must_use]
    pub fn rejected(expected: LifecycleState, actual: LifecycleState) -> Self {
        if actual.is_winding_down() {
            Self::Terminated
        } else {
            Self::InvalidState { expected, actual }
        }
    }
}

/// Whether a failed start may be retried.
///
/// A failed start either reverts the object to [`LifecycleState::None`] so
/// the caller can fix its configuration and try again, or retires the object
/// permanently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Revert to `None`; `start` may be called again.
    #[default]
    Retry,
    /// Move to `Stopped`; later `start` calls fail with
    /// [`LifecycleError::Terminated`].
    Never,
}

impl RestartPolicy {
    /// State adopted after a start attempt fails.
    #[must_use]
    pub const fn state_after_failed_start(self) -> LifecycleState {
        match self {
            Self::Retry => LifecycleState::None,
            Self::Never => LifecycleState::Stopped,
        }
    }
}

/// Outcome of racing for the `Running -> Stopping` edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopTicket {
    /// This caller owns teardown.
    Won,
    /// Another caller already owns (or finished) teardown.
    AlreadyStopping,
    /// The object was never running.
    NotRunning(LifecycleState),
}

/// Atomic holder for a [`LifecycleState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self { Self::new() }
}

impl StateCell {
    /// Create a cell in [`LifecycleState::None`].
    #[must_use]
    pub fn new() -> Self { Self(AtomicU8::new(LifecycleState::None as u8)) }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> LifecycleState { LifecycleState::from_u8(self.0.load(Ordering::Acquire)) }

    /// Move from `from` to `to` if the cell currently holds `from`.
    ///
    /// # Errors
    ///
    /// Returns the state actually observed when the swap fails.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LifecycleState::from_u8)
    }

    /// Claim the `None -> Starting` edge.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Terminated`] when the object is stopping or
    /// stopped and [`LifecycleError::InvalidState`] otherwise.
    pub fn begin_start(&self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::None, LifecycleState::Starting)
            .map_err(|actual| LifecycleError::rejected(LifecycleState::None, actual))
    }

    /// Complete a start by moving `Starting -> Running`.
    ///
    /// # Errors
    ///
    /// Fails if the cell is no longer `Starting`.
    pub fn finish_start(&self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Starting, LifecycleState::Running)
            .map_err(|actual| LifecycleError::rejected(LifecycleState::Starting, actual))
    }

    /// Abandon a start according to `policy`, returning the adopted state.
    pub fn abort_start(&self, policy: RestartPolicy) -> LifecycleState {
        let fallback = policy.state_after_failed_start();
        match self.transition(LifecycleState::Starting, fallback) {
            Ok(()) => fallback,
            Err(actual) => actual,
        }
    }

    /// Race for the `Running -> Stopping` edge.
    pub fn begin_stop(&self) -> StopTicket {
        match self.transition(LifecycleState::Running, LifecycleState::Stopping) {
            Ok(()) => StopTicket::Won,
            Err(actual) if actual.is_winding_down() => StopTicket::AlreadyStopping,
            Err(actual) => StopTicket::NotRunning(actual),
        }
    }

    /// Complete teardown by moving `Stopping -> Stopped`.
    ///
    /// Returns `false` if the cell was not `Stopping`.
    pub fn finish_stop(&self) -> bool {
        self.transition(LifecycleState::Stopping, LifecycleState::Stopped)
            .is_ok()
    }

    /// Returns `true` while the cell holds [`LifecycleState::Running`].
    #[must_use]
    pub fn is_running(&self) -> bool { self.get() == LifecycleState::Running }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use rstest::rstest;

    use super::*;

    #[test]
    fn start_walks_forward() {
        let cell = StateCell::new();
        cell.begin_start().expect("first start wins");
        assert_eq!(cell.get(), LifecycleState::Starting);
        cell.finish_start().expect("finish start");
        assert!(cell.is_running());
    }

    #[test]
    fn second_start_is_invalid_state() {
        let cell = StateCell::new();
        cell.begin_start().expect("first start wins");
        let err = cell.begin_start().expect_err("second start must fail");
        assert!(matches!(
            err,
            LifecycleError::InvalidState {
                expected: LifecycleState::None,
                actual: LifecycleState::Starting,
            }
        ));
    }

    #[test]
    fn start_after_stop_is_terminated() {
        let cell = StateCell::new();
        cell.begin_start().expect("start");
        cell.finish_start().expect("running");
        assert_eq!(cell.begin_stop(), StopTicket::Won);
        assert!(cell.finish_stop());
        assert!(matches!(
            cell.begin_start(),
            Err(LifecycleError::Terminated)
        ));
    }

    #[rstest]
    #[case(RestartPolicy::Retry, LifecycleState::None)]
    #[case(RestartPolicy::Never, LifecycleState::Stopped)]
    fn abort_start_follows_policy(#[case] policy: RestartPolicy, #[case] expected: LifecycleState) {
        let cell = StateCell::new();
        cell.begin_start().expect("start");
        assert_eq!(cell.abort_start(policy), expected);
        assert_eq!(cell.get(), expected);
    }

    #[test]
    fn stop_before_start_reports_not_running() {
        let cell = StateCell::new();
        assert_eq!(
            cell.begin_stop(),
            StopTicket::NotRunning(LifecycleState::None)
        );
    }

    #[test]
    fn concurrent_stop_has_single_winner() {
        let cell = Arc::new(StateCell::new());
        cell.begin_start().expect("start");
        cell.finish_start().expect("running");
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if cell.begin_stop() == StopTicket::Won {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("stop thread panicked");
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(cell.get(), LifecycleState::Stopping);
    }
}
