//! Atomic state cells with compare-and-swap transitions.

use super::{PipelineState, RunState, StepStatus};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// A lifecycle enum that can be packed into a `u8`.
pub trait StateRepr: Copy + fmt::Debug {
    /// Packs the state.
    fn to_repr(self) -> u8;
    /// Unpacks a state previously produced by [`StateRepr::to_repr`].
    fn from_repr(value: u8) -> Self;
}

/// An atomically updated lifecycle state.
pub struct AtomicState<S> {
    value: AtomicU8,
    _marker: PhantomData<S>,
}

impl<S: StateRepr> AtomicState<S> {
    /// Creates a cell holding `initial`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            value: AtomicU8::new(initial.to_repr()),
            _marker: PhantomData,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn load(&self) -> S {
        S::from_repr(self.value.load(Ordering::SeqCst))
    }

    /// Unconditionally replaces the state.
    pub fn store(&self, state: S) {
        self.value.store(state.to_repr(), Ordering::SeqCst);
    }

    /// Moves from `from` to `to`. On mismatch returns the actual state.
    pub fn transition(&self, from: S, to: S) -> Result<(), S> {
        self.value
            .compare_exchange(from.to_repr(), to.to_repr(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(S::from_repr)
    }
}

impl<S: StateRepr + Default> Default for AtomicState<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: StateRepr> fmt::Debug for AtomicState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(), f)
    }
}

impl StateRepr for RunState {
    fn to_repr(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Running => 1,
            Self::Completed => 2,
        }
    }

    fn from_repr(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Running,
            _ => Self::Completed,
        }
    }
}

impl StateRepr for StepStatus {
    fn to_repr(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
            Self::Stopped => 4,
            Self::Cancelled => 5,
        }
    }

    fn from_repr(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Succeeded,
            3 => Self::Failed,
            4 => Self::Stopped,
            _ => Self::Cancelled,
        }
    }
}

impl StateRepr for PipelineState {
    fn to_repr(self) -> u8 {
        match self {
            Self::Unprepared => 0,
            Self::Preparing => 1,
            Self::PreparedOk => 2,
            Self::PreparedFailed => 3,
            Self::Running => 4,
            Self::Completed => 5,
            Self::Faulted => 6,
            Self::Canceled => 7,
        }
    }

    fn from_repr(value: u8) -> Self {
        match value {
            0 => Self::Unprepared,
            1 => Self::Preparing,
            2 => Self::PreparedOk,
            3 => Self::PreparedFailed,
            4 => Self::Running,
            5 => Self::Completed,
            6 => Self::Faulted,
            _ => Self::Canceled,
        }
    }
}
