//! Deferred call results
//!
//! [`PendingResult`] is the host-visible face of an asynchronously
//! dispatched call: {Pending, Resolved, Rejected}, transitioning exactly
//! once and terminal after transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::bridge::error::BridgeError;
use crate::bridge::value::BridgeValue;

/// Observable state of a deferred call
#[derive(Debug, Clone, PartialEq)]
pub enum PendingState {
    /// Not completed yet
    Pending,
    /// Completed with a value
    Resolved(BridgeValue),
    /// Completed with an error
    Rejected(BridgeError),
}

struct PendingCell {
    state: Mutex<PendingState>,
    cond: Condvar,
    started: AtomicBool,
    cancel_requested: AtomicBool,
}

/// Cloneable handle to a deferred call result
#[derive(Clone)]
pub struct PendingResult {
    cell: Arc<PendingCell>,
}

impl PendingResult {
    /// Create a fresh pending cell
    pub fn new() -> Self {
        Self {
            cell: Arc::new(PendingCell {
                state: Mutex::new(PendingState::Pending),
                cond: Condvar::new(),
                started: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Snapshot of the current state without blocking
    pub fn poll(&self) -> PendingState {
        self.cell.state.lock().clone()
    }

    /// Whether the call has reached a terminal state
    pub fn is_done(&self) -> bool {
        !matches!(*self.cell.state.lock(), PendingState::Pending)
    }

    /// Block until completion and return the outcome
    pub fn wait(&self) -> Result<BridgeValue, BridgeError> {
        let mut state = self.cell.state.lock();
        while matches!(*state, PendingState::Pending) {
            self.cell.cond.wait(&mut state);
        }
        match &*state {
            PendingState::Resolved(v) => Ok(v.clone()),
            PendingState::Rejected(e) => Err(e.clone()),
            PendingState::Pending => unreachable!(),
        }
    }

    /// Block up to `timeout`; `None` when still pending afterwards
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<BridgeValue, BridgeError>> {
        let mut state = self.cell.state.lock();
        if matches!(*state, PendingState::Pending) {
            self.cell.cond.wait_for(&mut state, timeout);
        }
        match &*state {
            PendingState::Pending => None,
            PendingState::Resolved(v) => Some(Ok(v.clone())),
            PendingState::Rejected(e) => Some(Err(e.clone())),
        }
    }

    /// Request cancellation
    ///
    /// Before the call starts this resolves the cell with `Cancelled` and
    /// returns true. After start, cancellation is best-effort: the embedded
    /// call runs to completion and the request is ignored.
    pub fn cancel(&self) -> bool {
        self.cell.cancel_requested.store(true, Ordering::SeqCst);
        if !self.cell.started.load(Ordering::SeqCst) {
            return self.complete(Err(BridgeError::Cancelled));
        }
        false
    }

    /// Whether cancellation was requested
    pub(crate) fn cancel_requested(&self) -> bool {
        self.cell.cancel_requested.load(Ordering::SeqCst)
    }

    /// Mark the call as entered; returns false when it already completed
    /// (e.g. cancelled while queued) and must not run
    pub(crate) fn mark_started(&self) -> bool {
        self.cell.started.store(true, Ordering::SeqCst);
        !self.is_done() && !self.cancel_requested()
    }

    /// Transition to a terminal state; only the first transition wins
    pub(crate) fn complete(
        &self,
        outcome: Result<BridgeValue, BridgeError>,
    ) -> bool {
        let mut state = self.cell.state.lock();
        if !matches!(*state, PendingState::Pending) {
            return false;
        }
        *state = match outcome {
            Ok(v) => PendingState::Resolved(v),
            Err(e) => PendingState::Rejected(e),
        };
        drop(state);
        self.cell.cond.notify_all();
        true
    }
}

impl Default for PendingResult {
    fn default() -> Self {
        Self::new()
    }
}
