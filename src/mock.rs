//! # Manual Dispatch for Tests
//!
//! [`ManualDispatcher`] records drain sessions instead of running them, so a test decides
//! exactly when the mailbox drains. Everything between two `run_*` calls is plain enqueueing,
//! which makes ordering assertions deterministic without threads, sleeps or barriers.
//!
//! ## When to use it vs a real dispatcher
//!
//! | | `ManualDispatcher` | `Inline` / `TokioDispatcher` |
//! |---|---|---|
//! | **Determinism** | Total: nothing runs until asked | Subject to thread scheduling |
//! | **Blocking payloads** | Not needed to hold the drainer | Needed (gates, barriers) |
//! | **Use case** | Ordering and bookkeeping assertions | Concurrency and end-to-end tests |
//!
//! ```rust
//! use mailboxes::mock::ManualDispatcher;
//! use mailboxes::{Mailbox, NaturalOrder};
//! use std::sync::{Arc, Mutex};
//!
//! let dispatcher = ManualDispatcher::new();
//! let mailbox = Mailbox::<&'static str>::builder()
//!     .dispatcher(dispatcher.clone())
//!     .build_priority(NaturalOrder);
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! for key in ["c", "a", "b"] {
//!     let log = log.clone();
//!     mailbox.execute_with_context(key, move || log.lock().unwrap().push(key)).unwrap();
//! }
//! assert!(log.lock().unwrap().is_empty());
//!
//! dispatcher.run_all();
//! assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
//! ```

use crate::dispatch::{Dispatcher, Drain};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Dispatcher that queues drain sessions until the test runs them.
///
/// Clones share the same session queue, so keep one clone and hand another to the builder.
#[derive(Clone, Default)]
pub struct ManualDispatcher {
    sessions: Arc<Mutex<VecDeque<Drain>>>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Drain>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of drain sessions waiting to run.
    pub fn sessions(&self) -> usize {
        self.queue().len()
    }

    /// Runs the oldest waiting session. Returns `false` when there was none.
    pub fn run_next(&self) -> bool {
        // Popped before running: the session may dispatch a new one.
        let next = self.queue().pop_front();
        match next {
            Some(drain) => {
                drain.run();
                true
            }
            None => false,
        }
    }

    /// Runs sessions until none are left, including ones dispatched while running.
    /// Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Dispatcher for ManualDispatcher {
    fn dispatch(&self, drain: Drain) {
        self.queue().push_back(drain);
    }
}

impl fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("sessions", &self.sessions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sessions_run_in_dispatch_order() {
        let dispatcher = ManualDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let log = log.clone();
            dispatcher.dispatch(Drain::new(move || log.lock().unwrap().push(n)));
        }

        assert_eq!(dispatcher.sessions(), 3);
        assert!(dispatcher.run_next());
        assert_eq!(*log.lock().unwrap(), vec![0]);
        assert_eq!(dispatcher.run_all(), 2);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(!dispatcher.run_next());
    }

    #[test]
    fn run_all_picks_up_nested_dispatches() {
        let dispatcher = ManualDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let (d, c) = (dispatcher.clone(), count.clone());
        dispatcher.dispatch(Drain::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            d.dispatch(Drain::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(dispatcher.run_all(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
