use core::fmt;
use portable_atomic::{AtomicU8, Ordering};

/// Lifecycle of a worker.
///
/// ```text
/// Stop --start--> Init --loop up--> Idle <--drain--> Busy
///                   \                 |                |
///                    +------stop------+-----stop-------+--> Stop
/// ```
///
/// A stop received while requests are still assigned lets the drain finish
/// (bounded by the pool's drain timeout) before the loop exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    Init = 0,
    Idle = 1,
    Busy = 2,
    Stop = 3,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::Idle,
            2 => Self::Busy,
            _ => Self::Stop,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Shared, lock-free view of a worker's state.
///
/// Only the worker thread and the stop path write to it.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `state`, returning the previous one.
    pub(crate) fn set(&self, state: WorkerState) -> WorkerState {
        WorkerState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}
