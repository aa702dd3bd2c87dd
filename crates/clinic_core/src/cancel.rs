//! Cooperative cancellation for long-running read queries.
//!
//! # Responsibility
//! - Let another thread abort an in-flight aggregate or history query.
//!
//! # Invariants
//! - Cancellation only targets reads; transactional deletes never take a
//!   token, they either complete or roll back.
//! - A cancelled token stays cancelled; every later query fails fast.
//! - One token may guard several concurrent queries; each armed query holds
//!   its own interrupt handle until it finishes.
//! - A query that completes after its token fired still reports `Cancelled`.

use crate::repo::{RepoError, RepoResult};
use rusqlite::{Connection, InterruptHandle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    next_slot: AtomicU64,
    running: Mutex<Vec<(u64, InterruptHandle)>>,
}

/// Shareable cancellation signal.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token nobody cancels, for callers without a cancel button.
    pub fn never() -> Self {
        Self::default()
    }

    /// Marks the token cancelled and interrupts every running query.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        if let Ok(running) = self.state.running.lock() {
            for (_, handle) in running.iter() {
                handle.interrupt();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Arms the token for one query on `conn`.
    ///
    /// Fails with [`RepoError::Cancelled`] when the token was already
    /// cancelled. Dropping the guard disarms the token.
    pub(crate) fn arm(&self, conn: &Connection) -> RepoResult<ArmedQuery<'_>> {
        let slot = self.state.next_slot.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut running) = self.state.running.lock() {
            running.push((slot, conn.get_interrupt_handle()));
        }
        let armed = ArmedQuery { token: self, slot };
        if self.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        Ok(armed)
    }

    /// Runs `query` on `conn` with the token armed.
    pub(crate) fn run<T, F>(&self, conn: &Connection, query: F) -> RepoResult<T>
    where
        F: FnOnce() -> RepoResult<T>,
    {
        let armed = self.arm(conn)?;
        let result = query();
        armed.finish(result)
    }
}

pub(crate) struct ArmedQuery<'t> {
    token: &'t CancelToken,
    slot: u64,
}

impl ArmedQuery<'_> {
    /// Reports `Cancelled` whenever the token fired before the query
    /// finished, whatever the query returned.
    ///
    /// An interrupt sent before the statement started is a no-op in SQLite;
    /// this check covers that gap.
    pub(crate) fn finish<T>(self, result: RepoResult<T>) -> RepoResult<T> {
        if self.token.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        result
    }
}

impl Drop for ArmedQuery<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.token.state.running.lock() {
            running.retain(|(slot, _)| *slot != self.slot);
        }
    }
}
