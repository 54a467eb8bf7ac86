use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Stable mapping from thread handle to a zero-based ordinal.
///
/// Ordinals are handed out in first-call order and live until [`reset`].
///
/// [`reset`]: ThreadOrdinals::reset
#[derive(Default)]
pub struct ThreadOrdinals {
    assigned: Mutex<FxHashMap<ThreadId, usize>>,
}

impl ThreadOrdinals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal of the calling thread, assigning the next one on first call.
    pub fn ordinal(&self) -> usize {
        let id = thread::current().id();
        let mut assigned = self.assigned.lock();
        let next = assigned.len();
        *assigned.entry(id).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.assigned.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.assigned.lock().clear();
    }
}

/// Progress of the first-touch gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// No worker has registered.
    NotStarted,
    /// Workers below the ordinal have registered; that worker may go next.
    Initializing(usize),
    /// Every worker has registered.
    Ready,
}

/// Orders the first cache touch of each worker.
///
/// Worker `w` runs its registration only after worker `w - 1` has finished
/// its own, so thread ordinals always equal worker indexes.
pub struct FirstTouchGate {
    workers: usize,
    state: Mutex<GateState>,
    turn: Condvar,
}

impl FirstTouchGate {
    pub fn new(workers: usize) -> Self {
        let state = if workers == 0 {
            GateState::Ready
        } else {
            GateState::NotStarted
        };
        Self {
            workers,
            state: Mutex::new(state),
            turn: Condvar::new(),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.lock()
    }

    /// Blocks until it is `worker`'s turn, runs `register`, then admits the
    /// next worker.
    pub fn pass<T>(&self, worker: usize, register: impl FnOnce() -> T) -> T {
        let mut state = self.state.lock();
        while !Self::is_turn(*state, worker) {
            self.turn.wait(&mut state);
        }
        *state = GateState::Initializing(worker);
        let registered = register();
        *state = if worker + 1 >= self.workers {
            GateState::Ready
        } else {
            GateState::Initializing(worker + 1)
        };
        trace!(worker, "check.pool.gate_passed");
        self.turn.notify_all();
        registered
    }

    fn is_turn(state: GateState, worker: usize) -> bool {
        match state {
            GateState::NotStarted => worker == 0,
            GateState::Initializing(next) => next == worker,
            GateState::Ready => false,
        }
    }
}
