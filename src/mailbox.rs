//! # Mailbox
//!
//! The [`Mailbox`] serializes work submitted from any number of threads. Every submission
//! becomes a [`PendingItem`](crate::PendingItem) in the mailbox's store; whichever producer
//! finds the mailbox idle claims the *drainer* role and runs items one at a time until the
//! store is empty.
//!
//! ## Concurrency Model
//!
//! The store, the `draining` flag and the `closed` flag live behind one mutex. The lock is
//! held only to push or pop, never while a payload runs, so a slow payload never blocks a
//! producer. Releasing the drainer role happens in the same critical section that observes
//! the empty store: a producer racing the release either sees `draining == true` (and its
//! item is popped by the current drainer) or claims the role itself. No item is stranded.
//!
//! ## Failure Model
//!
//! A panicking payload is contained: the panic is logged, the item is gone, and the drain
//! loop moves on. The drainer role is held through a [`DrainGuard`] that releases the flag
//! on every exit path.

use crate::dispatch::{Dispatcher, Drain, Inline};
use crate::error::MailboxError;
use crate::priority::{KeyComparer, PriorityMailbox, PriorityStore};
use crate::store::{FifoStore, Payload, PendingItem, PendingStore};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

/// Serializing work queue shared by any number of producers.
///
/// Cloning is cheap and every clone refers to the same mailbox.
///
/// ```rust
/// use mailboxes::Mailbox;
/// use std::sync::{Arc, Mutex};
///
/// let mailbox = Mailbox::<()>::new();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// for n in 0..3 {
///     let log = log.clone();
///     mailbox.execute(move || log.lock().unwrap().push(n)).unwrap();
/// }
///
/// assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
/// ```
pub struct Mailbox<K> {
    shared: Arc<Shared<K>>,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    dispatcher: Arc<dyn Dispatcher>,
    name: String,
}

struct State<K> {
    store: Box<dyn PendingStore<K>>,
    draining: bool,
    closed: bool,
    next_sequence: u64,
}

impl<K: Send + 'static> Mailbox<K> {
    /// FIFO mailbox that drains inline on the claiming thread.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MailboxBuilder<K> {
        MailboxBuilder::new()
    }

    /// Enqueues `action` under the default context.
    ///
    /// With the [`Inline`] dispatcher the action may run before this returns (when the caller
    /// becomes the drainer); otherwise it runs later. Nothing the action does is reported back.
    pub fn execute<F>(&self, action: F) -> Result<(), MailboxError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(None, Box::new(action))
    }

    /// Enqueues `action` tagged with `key`.
    pub fn execute_with_context<F>(&self, key: K, action: F) -> Result<(), MailboxError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Some(key), Box::new(action))
    }

    /// Rejects further work and discards everything still pending.
    ///
    /// A payload that is already running finishes normally. Returns how many items were
    /// discarded. Closing twice is harmless.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.store.take_all()
        };
        let count = discarded.len();
        debug!(mailbox = %self.shared.name, discarded = count, "Closed");
        // Payload destructors may call back into the mailbox.
        drop(discarded);
        count
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of items waiting to run (the running one excluded).
    pub fn pending(&self) -> usize {
        self.shared.lock().store.len()
    }

    /// Whether a drain session currently holds the drainer role.
    pub fn is_draining(&self) -> bool {
        self.shared.lock().draining
    }

    pub(crate) fn enqueue(&self, key: Option<K>, payload: Payload) -> Result<(), MailboxError> {
        let has_key = key.is_some();
        let (sequence, claimed) = {
            let mut state = self.shared.lock();
            if state.closed {
                drop(state);
                warn!(mailbox = %self.shared.name, "Rejected enqueue on closed mailbox");
                return Err(MailboxError::Closed);
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.store.push(PendingItem::new(payload, key, sequence));
            let claimed = !state.draining;
            state.draining = true;
            (sequence, claimed)
        };
        trace!(mailbox = %self.shared.name, sequence, has_key, claimed, "Enqueued");

        if claimed {
            let shared = Arc::clone(&self.shared);
            self.shared
                .dispatcher
                .dispatch(Drain::new(move || shared.drain()));
        }
        Ok(())
    }
}

impl<K: Send + 'static> Default for Mailbox<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Mailbox<K> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<K> Clone for Mailbox<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> fmt::Debug for Mailbox<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Mailbox")
            .field("name", &self.shared.name)
            .field("ordering", &state.store.kind())
            .field("pending", &state.store.len())
            .field("draining", &state.draining)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<K> Shared<K> {
    // Payloads never run under the lock, so a poisoned lock only means a comparer
    // panicked mid-push; the flags are still meaningful.
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) {
        debug!(mailbox = %self.name, "Drain started");
        let mut guard = DrainGuard {
            shared: self,
            held: true,
        };
        let mut ran = 0usize;
        while let Some(item) = guard.next() {
            let sequence = item.sequence();
            trace!(mailbox = %self.name, sequence, "Running");
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(item.into_payload())) {
                error!(
                    mailbox = %self.name,
                    sequence,
                    panic = panic_message(panic.as_ref()),
                    "Payload panicked"
                );
            }
            ran += 1;
        }
        debug!(mailbox = %self.name, ran, "Drain finished");
    }
}

/// Scoped ownership of the drainer role.
struct DrainGuard<'a, K> {
    shared: &'a Shared<K>,
    held: bool,
}

impl<K> DrainGuard<'_, K> {
    /// Pops the next item, or gives up the role when the store is empty. Both happen under
    /// the same lock acquisition.
    fn next(&mut self) -> Option<PendingItem<K>> {
        let mut state = self.shared.lock();
        match state.store.pop() {
            Some(item) => Some(item),
            None => {
                state.draining = false;
                self.held = false;
                None
            }
        }
    }
}

impl<K> Drop for DrainGuard<'_, K> {
    fn drop(&mut self) {
        if self.held {
            self.shared.lock().draining = false;
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic>"
    }
}

/// Configures a [`Mailbox`] or [`PriorityMailbox`].
///
/// ```rust
/// use mailboxes::{Mailbox, NaturalOrder, TokioDispatcher};
///
/// # #[tokio::main] async fn main() {
/// let mailbox = Mailbox::<u8>::builder()
///     .name("ingest")
///     .dispatcher(TokioDispatcher::current())
///     .build_priority(NaturalOrder);
/// assert_eq!(mailbox.name(), "ingest");
/// # }
/// ```
pub struct MailboxBuilder<K> {
    store: Option<Box<dyn PendingStore<K>>>,
    dispatcher: Arc<dyn Dispatcher>,
    name: String,
}

impl<K: Send + 'static> MailboxBuilder<K> {
    fn new() -> Self {
        Self {
            store: None,
            dispatcher: Arc::new(Inline),
            name: "mailbox".to_string(),
        }
    }

    /// Name recorded on every log line of this mailbox.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn dispatcher(mut self, dispatcher: impl Dispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    /// Replaces the ordering policy with a custom store.
    pub fn store(mut self, store: impl PendingStore<K> + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Builds a mailbox; FIFO unless a store was supplied.
    pub fn build(self) -> Mailbox<K> {
        let store = self
            .store
            .unwrap_or_else(|| Box::new(FifoStore::<K>::new()));
        debug!(mailbox = %self.name, ordering = store.kind(), "Mailbox created");
        Mailbox {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    store,
                    draining: false,
                    closed: false,
                    next_sequence: 0,
                }),
                dispatcher: self.dispatcher,
                name: self.name,
            }),
        }
    }

    /// Builds a priority mailbox ordered by `comparer`, replacing any configured store.
    pub fn build_priority(self, comparer: impl KeyComparer<K>) -> PriorityMailbox<K> {
        PriorityMailbox::from_mailbox(self.store(PriorityStore::new(comparer)).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ManualDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Payload) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let make = move |n: u32| -> Payload {
            let l = l.clone();
            Box::new(move || l.lock().unwrap().push(n))
        };
        (log, make)
    }

    #[test]
    fn inline_producer_becomes_drainer() {
        let mailbox = Mailbox::<()>::new();
        let (log, make) = recorder();

        mailbox.enqueue(None, make(1)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(!mailbox.is_draining());
    }

    #[test]
    fn nested_execute_runs_after_current_payload() {
        let mailbox = Mailbox::<()>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (m, l) = (mailbox.clone(), log.clone());
        mailbox
            .execute(move || {
                let l2 = l.clone();
                m.execute(move || l2.lock().unwrap().push("inner")).unwrap();
                l.lock().unwrap().push("outer");
            })
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn one_session_per_claim() {
        let dispatcher = ManualDispatcher::new();
        let mailbox = Mailbox::<()>::builder()
            .dispatcher(dispatcher.clone())
            .build();
        let (log, make) = recorder();

        for n in 0..3 {
            mailbox.enqueue(None, make(n)).unwrap();
        }
        assert_eq!(dispatcher.sessions(), 1);
        assert!(mailbox.is_draining());
        assert_eq!(mailbox.pending(), 3);

        assert_eq!(dispatcher.run_all(), 1);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(!mailbox.is_draining());

        mailbox.enqueue(None, make(3)).unwrap();
        assert_eq!(dispatcher.sessions(), 1);
    }

    #[test]
    fn panicking_payload_does_not_stall_the_mailbox() {
        let mailbox = Mailbox::<()>::new();
        let after = Arc::new(AtomicUsize::new(0));

        let (m, a) = (mailbox.clone(), after.clone());
        mailbox
            .execute(move || {
                m.execute(move || {
                    a.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
                panic!("payload failure");
            })
            .unwrap();

        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(!mailbox.is_draining());

        let a = after.clone();
        mailbox
            .execute(move || {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn session_dropped_by_dispatcher_still_drains() {
        let mailbox = Mailbox::<()>::builder()
            .dispatcher(|drain: Drain| drop(drain))
            .build();
        let (log, make) = recorder();

        mailbox.enqueue(None, make(1)).unwrap();
        mailbox.enqueue(None, make(2)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert_eq!(mailbox.pending(), 0);
        assert!(!mailbox.is_draining());
    }

    #[test]
    fn close_discards_pending_and_rejects_new_work() {
        let dispatcher = ManualDispatcher::new();
        let mailbox = Mailbox::<()>::builder()
            .dispatcher(dispatcher.clone())
            .build();
        let (log, make) = recorder();

        mailbox.enqueue(None, make(1)).unwrap();
        mailbox.enqueue(None, make(2)).unwrap();

        assert_eq!(mailbox.close(), 2);
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.enqueue(None, make(3)), Err(MailboxError::Closed));

        dispatcher.run_all();
        assert!(log.lock().unwrap().is_empty());
        assert!(!mailbox.is_draining());
        assert_eq!(mailbox.close(), 0);
    }

    #[test]
    fn debug_shows_ordering_and_counts() {
        let dispatcher = ManualDispatcher::new();
        let mailbox = Mailbox::<u8>::builder()
            .name("orders")
            .dispatcher(dispatcher)
            .build_priority(crate::NaturalOrder);
        mailbox.execute(|| {}).unwrap();

        let text = format!("{mailbox:?}");
        assert!(text.contains("\"orders\""));
        assert!(text.contains("priority"));
        assert!(text.contains("pending: 1"));
    }

    #[test]
    fn panic_message_handles_both_string_kinds() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(static_str.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic>");
    }
}
