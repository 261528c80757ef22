//! # Mailbox Tasks
//!
//! Awaiting the mailbox means "run the rest of this computation as mailbox work". A Rust
//! future resumes only when it is polled, so the mailbox achieves this by *being* the thing
//! that polls: [`Mailbox::spawn`] hands the future to the mailbox, and every poll of it is a
//! pending item popped by the drain loop. The code between two suspension points therefore
//! runs serialized with every other payload, and a suspended computation holds nothing.
//!
//! ## Resumption Keys
//!
//! Each wake-up of a mailbox task enqueues one pending item. Its context key is whatever the
//! last context-setting await asked for ([`Scope::with_context`],
//! [`ContinueWithContext`](crate::ContinueWithContext)), or the default context otherwise.
//!
//! Requests are numbered. A request is *enqueued* once a wake-up carries its key into the
//! store and *granted* once that item is popped and the task is polled. Context futures
//! complete only when their request has been granted, which makes them immune to stray
//! polls. A task sits in the store at most once at a time; extra wake-ups while it waits
//! are merged into the item already queued.
//!
//! Context futures also park the waker they were polled with. When a request is granted,
//! the parked wakers are woken before the task is polled, so a context future nested inside
//! a combinator that polls its children with their own wakers (`join_all`,
//! `FuturesUnordered`, `select`) is re-polled on its turn. Requests still outstanding after
//! a poll re-enqueue the task under the most recent key.
//!
//! ```rust
//! use mailboxes::{PriorityMailbox, TokioDispatcher};
//!
//! # #[tokio::main(flavor = "multi_thread")] async fn main() {
//! let mailbox = PriorityMailbox::<u8>::builder()
//!     .dispatcher(TokioDispatcher::current())
//!     .build_priority(mailboxes::NaturalOrder);
//!
//! let handle = mailbox
//!     .spawn(|scope| async move {
//!         scope.with_context(1).await;
//!         "resumed on its turn"
//!     })
//!     .unwrap();
//! assert_eq!(handle.await.unwrap(), "resumed on its turn");
//! # }
//! ```

use crate::error::MailboxError;
use crate::mailbox::{panic_message, Mailbox};
use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Wake, Waker};
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) struct TaskCell<K> {
    mailbox: Mailbox<K>,
    future: Mutex<Option<BoxFuture>>,
    resume: Mutex<Resume<K>>,
    scheduled: AtomicBool,
    polling: AtomicBool,
}

struct Resume<K> {
    key: Option<K>,
    requested: u64,
    /// Highest ticket that needs a turn without waiting on anything else.
    wanted: u64,
    enqueued: u64,
    granted: u64,
    parked: Vec<(u64, Waker)>,
}

/// Progress of one resumption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnState {
    Requested,
    Enqueued,
    Granted,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: Send + 'static> TaskCell<K> {
    /// Records the key for the next wake-up and returns the request's ticket.
    pub(crate) fn request(&self, key: Option<K>) -> u64 {
        let mut resume = lock(&self.resume);
        resume.requested += 1;
        resume.key = key;
        resume.requested
    }

    pub(crate) fn turn_state(&self, ticket: u64) -> TurnState {
        let resume = lock(&self.resume);
        if resume.granted >= ticket {
            TurnState::Granted
        } else if resume.enqueued >= ticket {
            TurnState::Enqueued
        } else {
            TurnState::Requested
        }
    }

    /// Asks for a turn for `ticket` now rather than on some later wake-up.
    pub(crate) fn want_turn(self: &Arc<Self>, ticket: u64) {
        {
            let mut resume = lock(&self.resume);
            resume.wanted = resume.wanted.max(ticket);
        }
        self.reschedule();
    }

    /// Remembers `waker` until `ticket` is granted.
    pub(crate) fn park(&self, ticket: u64, waker: &Waker) {
        let mut resume = lock(&self.resume);
        if resume.granted >= ticket {
            drop(resume);
            waker.wake_by_ref();
            return;
        }
        let known = resume
            .parked
            .iter()
            .any(|(parked, w)| *parked == ticket && w.will_wake(waker));
        if !known {
            resume.parked.push((ticket, waker.clone()));
        }
    }

    /// Whether the task's future is being polled right now.
    pub(crate) fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    fn schedule(self: &Arc<Self>) -> Result<(), MailboxError> {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (key, ticket) = {
            let mut resume = lock(&self.resume);
            resume.enqueued = resume.requested;
            (resume.key.take(), resume.requested)
        };
        let task = Arc::clone(self);
        self.mailbox
            .enqueue(key, Box::new(move || task.run(ticket)))
    }

    pub(crate) fn reschedule(self: &Arc<Self>) {
        if let Err(err) = self.schedule() {
            warn!(mailbox = %self.mailbox.name(), error = %err, "Dropped wake-up of mailbox task");
        }
    }

    fn run(self: &Arc<Self>, ticket: u64) {
        let woken = {
            let mut resume = lock(&self.resume);
            resume.granted = resume.granted.max(ticket);
            let granted = resume.granted;
            let (ready, waiting) = mem::take(&mut resume.parked)
                .into_iter()
                .partition::<Vec<_>, _>(|(parked, _)| *parked <= granted);
            resume.parked = waiting;
            ready
        };
        // Still marked scheduled, so wake-ups that route back to this task merge into
        // the poll below instead of queueing another item.
        for (_, waker) in woken {
            waker.wake();
        }
        self.scheduled.store(false, Ordering::Release);

        let mut slot = lock(&self.future);
        let Some(future) = slot.as_mut() else {
            trace!(mailbox = %self.mailbox.name(), ticket, "Wake-up after completion ignored");
            return;
        };
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        self.polling.store(true, Ordering::Release);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
        self.polling.store(false, Ordering::Release);
        match polled {
            Ok(Poll::Pending) => {}
            Ok(Poll::Ready(())) => {
                *slot = None;
                trace!(mailbox = %self.mailbox.name(), ticket, "Task completed");
            }
            Err(panic) => {
                *slot = None;
                error!(
                    mailbox = %self.mailbox.name(),
                    ticket,
                    panic = panic_message(panic.as_ref()),
                    "Mailbox task panicked"
                );
            }
        }
        let live = slot.is_some();
        drop(slot);

        // A turn asked for after the queued item took its snapshot is not carried by any
        // item yet.
        let outstanding = {
            let resume = lock(&self.resume);
            resume.wanted > resume.enqueued
        };
        if live && outstanding {
            self.reschedule();
        } else if !live {
            lock(&self.resume).parked.clear();
        }
    }
}

impl<K: Send + 'static> Wake for TaskCell<K> {
    fn wake(self: Arc<Self>) {
        self.reschedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.reschedule();
    }
}

impl<K: Send + 'static> Mailbox<K> {
    /// Runs an async computation on this mailbox, starting with a turn under the default
    /// context.
    ///
    /// `f` receives the computation's [`Scope`]. Every poll of the returned future happens
    /// inside the drain loop; the output is delivered through the [`TaskHandle`].
    pub fn spawn<F, Fut>(&self, f: F) -> Result<TaskHandle<Fut::Output>, MailboxError>
    where
        F: FnOnce(Scope<K>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.spawn_task(None, f)
    }

    /// Like [`Mailbox::spawn`], but the first turn is tagged with `key`.
    pub fn spawn_with_context<F, Fut>(
        &self,
        key: K,
        f: F,
    ) -> Result<TaskHandle<Fut::Output>, MailboxError>
    where
        F: FnOnce(Scope<K>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.spawn_task(Some(key), f)
    }

    fn spawn_task<F, Fut>(
        &self,
        key: Option<K>,
        f: F,
    ) -> Result<TaskHandle<Fut::Output>, MailboxError>
    where
        F: FnOnce(Scope<K>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let task = Arc::new_cyclic(|weak: &Weak<TaskCell<K>>| {
            let future = f(Scope {
                task: weak.clone(),
                mailbox: self.clone(),
            });
            let future: BoxFuture = Box::pin(async move {
                let _ = sender.send(future.await);
            });
            TaskCell {
                mailbox: self.clone(),
                future: Mutex::new(Some(future)),
                resume: Mutex::new(Resume {
                    key,
                    requested: 1,
                    wanted: 1,
                    enqueued: 0,
                    granted: 0,
                    parked: Vec::new(),
                }),
                scheduled: AtomicBool::new(false),
                polling: AtomicBool::new(false),
            }
        });
        task.schedule()?;
        Ok(TaskHandle { receiver })
    }
}

/// Handle a mailbox task uses to schedule its own resumptions.
///
/// A scope belongs to the computation it was handed to. Its futures must be awaited from
/// inside that computation, including through combinators such as `join!` or `join_all`.
pub struct Scope<K> {
    task: Weak<TaskCell<K>>,
    mailbox: Mailbox<K>,
}

impl<K: Send + 'static> Scope<K> {
    /// Yields the turn: the rest of the computation is re-enqueued under the default
    /// context, behind whatever that ordering puts first.
    pub fn turn(&self) -> WithContext<'_, K> {
        WithContext::new(self, None)
    }

    /// Yields the turn and resumes under `key`. Lazy: nothing is enqueued until polled.
    ///
    /// Must be awaited from inside this scope's own computation. Awaited anywhere else it
    /// would wait for a turn that the other computation never takes; debug builds panic.
    pub fn with_context(&self, key: K) -> WithContext<'_, K> {
        WithContext::new(self, Some(key))
    }

    /// The mailbox this computation runs on.
    pub fn mailbox(&self) -> &Mailbox<K> {
        &self.mailbox
    }

    pub(crate) fn task(&self) -> Option<Arc<TaskCell<K>>> {
        self.task.upgrade()
    }
}

impl<K> Clone for Scope<K> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<K> fmt::Debug for Scope<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("mailbox", &self.mailbox.name())
            .field("live", &(self.task.strong_count() > 0))
            .finish()
    }
}

/// Future returned by [`Scope::turn`] and [`Scope::with_context`].
#[must_use = "futures do nothing unless awaited"]
pub struct WithContext<'a, K> {
    scope: &'a Scope<K>,
    key: Option<K>,
    ticket: Option<u64>,
}

impl<'a, K> WithContext<'a, K> {
    fn new(scope: &'a Scope<K>, key: Option<K>) -> Self {
        Self {
            scope,
            key,
            ticket: None,
        }
    }
}

impl<K> Unpin for WithContext<'_, K> {}

impl<K: Send + 'static> Future for WithContext<'_, K> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(task) = this.scope.task() else {
            return Poll::Ready(());
        };
        debug_assert!(
            task.is_polling(),
            "`Scope` future awaited outside the mailbox task it belongs to"
        );
        let Some(ticket) = this.ticket else {
            let ticket = task.request(this.key.take());
            this.ticket = Some(ticket);
            task.want_turn(ticket);
            task.park(ticket, cx.waker());
            return Poll::Pending;
        };
        match task.turn_state(ticket) {
            TurnState::Granted => Poll::Ready(()),
            TurnState::Enqueued => {
                task.park(ticket, cx.waker());
                Poll::Pending
            }
            // The wake-up was merged into an older queued item; queue our own.
            TurnState::Requested => {
                task.want_turn(ticket);
                task.park(ticket, cx.waker());
                Poll::Pending
            }
        }
    }
}

/// Completion of a [`Mailbox::spawn`]ed computation.
///
/// Resolves to the computation's output, or [`MailboxError::TaskDropped`] when the mailbox
/// discarded it (closed) or it panicked. Dropping the handle does not cancel anything.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, MailboxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map_err(|_| MailboxError::TaskDropped)
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}
