//! Reentrancy guard for polls.
//!
//! At most one poll runs at a time. A caller arriving while a poll is in
//! flight blocks until it finishes and reports that poll's count instead
//! of starting its own. Waiting re-checks the caller's cancellation token
//! every `slice`, and [`PollGuard::wake_all`] releases waiters immediately.
//! A poll that re-enters from its own thread (a subscriber calling back into
//! the watcher) gets 0 instead of waiting on itself.

use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::signal::CancellationToken;

#[derive(Debug, Default)]
struct GuardState {
    in_progress: bool,
    owner: Option<ThreadId>,
    generation: u64,
    last_count: usize,
    waiters: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PollGuard {
    state: Mutex<GuardState>,
    finished: Condvar,
}

/// Publishes the count and releases waiters even if the poll unwinds.
struct InFlight<'a> {
    guard: &'a PollGuard,
    count: usize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.guard.state.lock();
        state.in_progress = false;
        state.owner = None;
        state.generation = state.generation.wrapping_add(1);
        state.last_count = self.count;
        drop(state);
        self.guard.finished.notify_all();
    }
}

impl PollGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `poll` exclusively, or join the poll already in flight.
    /// A waiter cancelled before the in-flight poll finishes gets 0.
    pub(crate) fn run<F>(&self, cancel: &CancellationToken, slice: Duration, poll: F) -> usize
    where
        F: FnOnce() -> usize,
    {
        let mut state = self.state.lock();

        if state.in_progress && state.owner == Some(thread::current().id()) {
            tracing::debug!("Nested poll from the polling thread skipped");
            return 0;
        }

        if state.in_progress {
            let generation = state.generation;
            state.waiters += 1;
            while state.in_progress && state.generation == generation {
                if cancel.is_cancelled() {
                    state.waiters -= 1;
                    tracing::debug!("Coalesced poll wait cancelled");
                    return 0;
                }
                self.finished.wait_for(&mut state, slice);
            }
            state.waiters -= 1;
            return state.last_count;
        }

        state.in_progress = true;
        state.owner = Some(thread::current().id());
        drop(state);

        let mut flight = InFlight { guard: self, count: 0 };
        flight.count = poll();
        flight.count
    }

    /// Wake every waiter so it can observe cancellation.
    pub(crate) fn wake_all(&self) {
        // taking the lock orders this after any waiter's cancellation check
        drop(self.state.lock());
        self.finished.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_polling(&self) -> bool {
        self.state.lock().in_progress
    }

    #[cfg(test)]
    pub(crate) fn waiters(&self) -> usize {
        self.state.lock().waiters
    }
}
