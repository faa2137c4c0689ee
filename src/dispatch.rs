//! Fan-out of classified events to subscribers
//!
//! Delivery order is fixed: the four singleton kinds, then local branch
//! created/changed/deleted, then remote branch created/deleted. Each
//! subscriber call runs on the dispatching thread inside its own
//! `catch_unwind`, so a panicking subscriber is logged and the remaining
//! subscribers still receive the event. Anything beyond panics (retries,
//! async hand-off) is the subscriber's own business.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{Classification, RepoEvent, RepoEventKind};

pub type Subscriber = Arc<dyn Fn(&RepoEvent) + Send + Sync>;

/// Per-kind subscriber registry.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: RwLock<[Vec<Subscriber>; 9]>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: RepoEventKind, callback: F)
    where
        F: Fn(&RepoEvent) + Send + Sync + 'static,
    {
        self.subscribers.write()[kind.index()].push(Arc::new(callback));
    }

    /// Register one callback for every kind.
    pub fn subscribe_all<F>(&self, callback: F)
    where
        F: Fn(&RepoEvent) + Send + Sync + 'static,
    {
        let callback: Subscriber = Arc::new(callback);
        let mut subscribers = self.subscribers.write();
        for list in subscribers.iter_mut() {
            list.push(Arc::clone(&callback));
        }
    }

    /// Deliver the given kinds into a channel. Once the receiver is dropped, sends are silently discarded.
    pub fn channel(&self, kinds: &[RepoEventKind]) -> Receiver<RepoEvent> {
        let (tx, rx) = mpsc::channel();
        let callback: Subscriber = Arc::new(move |event: &RepoEvent| {
            let _ = tx.send(event.clone());
        });

        let mut subscribers = self.subscribers.write();
        for kind in kinds {
            subscribers[kind.index()].push(Arc::clone(&callback));
        }
        rx
    }

    pub fn subscriber_count(&self, kind: RepoEventKind) -> usize {
        self.subscribers.read()[kind.index()].len()
    }

    /// Fire every event in `result` and return how many notifications it held.
    /// Kinds without subscribers still count.
    pub fn dispatch(&self, result: &Classification) -> usize {
        let mut fired = 0;

        for event in result.events() {
            // snapshot so callbacks may subscribe without deadlocking
            let targets = self.subscribers.read()[event.kind().index()].clone();
            for subscriber in &targets {
                deliver(subscriber, &event);
            }
            fired += 1;
        }

        if fired > 0 {
            tracing::debug!("Dispatched {} repository notifications", fired);
        }
        fired
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.read();
        f.debug_struct("Dispatcher")
            .field("subscribers", &subscribers.iter().map(Vec::len).collect::<Vec<_>>())
            .finish()
    }
}

fn deliver(subscriber: &Subscriber, event: &RepoEvent) {
    if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
        tracing::error!("Subscriber panicked while handling '{}'", event);
    }
}
