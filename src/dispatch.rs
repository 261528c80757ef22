//! # Dispatchers
//!
//! The mailbox never spawns threads. When a producer claims the drainer role it hands the
//! drain session to a [`Dispatcher`], which is simply "a way to run a callback":
//!
//! - [`Inline`] runs the session on the claiming thread (the default). The producer that
//!   enqueued first keeps draining until the store is empty.
//! - [`TokioDispatcher`] moves the session onto tokio's blocking pool, so async producers and
//!   timer wake-ups never execute mailbox work on a runtime worker.
//! - Any `Fn(Drain)` closure works too, e.g. `|drain: Drain| { std::thread::spawn(move || drain.run()); }`.
//!
//! A dispatcher is called once per drain session. A session the dispatcher drops without
//! running (a runtime that has shut down, a rejected spawn) drains inline in its destructor,
//! on whichever thread drops it, so the items behind it are never stranded.

use std::fmt;
use tokio::runtime::Handle;
use tracing::warn;

/// One drain session: pops and runs items until the store is empty.
#[must_use = "a drain session runs when `run` is called, or inline when dropped"]
pub struct Drain {
    session: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Drain {
    pub fn new(session: impl FnOnce() + Send + 'static) -> Self {
        Self {
            session: Some(Box::new(session)),
        }
    }

    pub fn run(mut self) {
        if let Some(session) = self.session.take() {
            session();
        }
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Drain session dropped by its dispatcher, draining inline");
            session();
        }
    }
}

impl fmt::Debug for Drain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drain")
            .field("pending", &self.session.is_some())
            .finish()
    }
}

pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, drain: Drain);
}

impl<F> Dispatcher for F
where
    F: Fn(Drain) + Send + Sync + 'static,
{
    fn dispatch(&self, drain: Drain) {
        self(drain)
    }
}

/// Runs the drain session on the thread that claimed it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Dispatcher for Inline {
    fn dispatch(&self, drain: Drain) {
        drain.run()
    }
}

/// Runs drain sessions on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: Handle,
}

impl TokioDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Like [`TokioDispatcher::current`], but returns `None` outside a runtime.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, drain: Drain) {
        // Detached: the session owns everything it needs. A runtime that has shut down
        // drops the closure, and with it the session, which then drains inline.
        drop(self.handle.spawn_blocking(move || drain.run()));
    }
}
