//! # Continuation Contexts
//!
//! [`ContinueWithContext`] attaches a context key to the resumption that follows an
//! arbitrary operation. Whatever completes the operation (a timer, a channel, another
//! runtime), the awaiting mailbox task does not continue there: its wake-up is enqueued on
//! the task's mailbox under the key and the rest of the computation runs on its turn.
//!
//! The operation's outcome is delivered unchanged, so a failed operation surfaces its error
//! once the continuation finally runs. An operation that is already complete when first
//! polled is still routed through the mailbox: the task yields once under the key.
//!
//! ```rust
//! use mailboxes::{ContinueWithContext, PriorityMailbox, TokioDispatcher};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "multi_thread")] async fn main() {
//! let mailbox = PriorityMailbox::<&'static str>::builder()
//!     .dispatcher(TokioDispatcher::current())
//!     .build_priority(mailboxes::NaturalOrder);
//!
//! let handle = mailbox
//!     .spawn(|scope| async move {
//!         tokio::time::sleep(Duration::from_millis(1))
//!             .continue_with_context(&scope, "timers")
//!             .await;
//!     })
//!     .unwrap();
//! handle.await.unwrap();
//! # }
//! ```

use crate::task::{Scope, TurnState};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Extension for routing an operation's continuation through a mailbox under a key.
pub trait ContinueWithContext: Future + Sized {
    /// Resumes the awaiting mailbox task under `key` once `self` completes.
    ///
    /// `scope` must be the scope of the task doing the awaiting. Awaited from any other
    /// computation, the continuation waits for a turn that its owner never takes; debug
    /// builds panic.
    fn continue_with_context<K>(self, scope: &Scope<K>, key: K) -> ContextContinuation<'_, Self, K>
    where
        K: Clone + Send + 'static,
    {
        ContextContinuation {
            scope,
            key,
            inner: Box::pin(self),
            stage: Stage::Polling(None),
        }
    }
}

impl<F: Future> ContinueWithContext for F {}

enum Stage<T> {
    Polling(Option<u64>),
    Completed(u64, T),
    Done,
}

/// Future returned by [`ContinueWithContext::continue_with_context`].
#[must_use = "futures do nothing unless awaited"]
pub struct ContextContinuation<'a, F: Future, K> {
    scope: &'a Scope<K>,
    key: K,
    inner: Pin<Box<F>>,
    stage: Stage<F::Output>,
}

// The operation is boxed and the stored output is never pinned.
impl<F: Future, K> Unpin for ContextContinuation<'_, F, K> {}

impl<F: Future, K: Clone + Send + 'static> Future for ContextContinuation<'_, F, K> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        let Some(task) = this.scope.task() else {
            // No mailbox task to route through: behave like the bare operation.
            return match mem::replace(&mut this.stage, Stage::Done) {
                Stage::Completed(_, output) => Poll::Ready(output),
                stage => {
                    this.stage = stage;
                    this.inner.as_mut().poll(cx)
                }
            };
        };
        debug_assert!(
            task.is_polling(),
            "`ContextContinuation` awaited outside the mailbox task it belongs to"
        );

        match mem::replace(&mut this.stage, Stage::Done) {
            Stage::Completed(ticket, output) => match task.turn_state(ticket) {
                TurnState::Granted => Poll::Ready(output),
                state => {
                    if state == TurnState::Requested {
                        task.want_turn(ticket);
                    }
                    task.park(ticket, cx.waker());
                    this.stage = Stage::Completed(ticket, output);
                    Poll::Pending
                }
            },
            Stage::Polling(ticket) => {
                let ticket = match ticket {
                    Some(ticket) => ticket,
                    None => task.request(Some(this.key.clone())),
                };
                match this.inner.as_mut().poll(cx) {
                    Poll::Ready(output) => match task.turn_state(ticket) {
                        TurnState::Granted => Poll::Ready(output),
                        // Finished without the mailbox handing us the turn: already
                        // complete, or polled by some other wake-up. Yield under the key.
                        state => {
                            if state == TurnState::Requested {
                                task.want_turn(ticket);
                            }
                            task.park(ticket, cx.waker());
                            this.stage = Stage::Completed(ticket, output);
                            Poll::Pending
                        }
                    },
                    Poll::Pending => {
                        // A granted ticket means its key was spent on an unrelated wake-up;
                        // arm a fresh one for the operation's real completion.
                        let ticket = match task.turn_state(ticket) {
                            TurnState::Granted => task.request(Some(this.key.clone())),
                            _ => ticket,
                        };
                        this.stage = Stage::Polling(Some(ticket));
                        Poll::Pending
                    }
                }
            }
            Stage::Done => panic!("`ContextContinuation` polled after completion"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ManualDispatcher;
    use crate::{Mailbox, NaturalOrder};
    use std::cmp::Ordering;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    // Default context first, then ordinal key order.
    fn ordinal(a: Option<&&'static str>, b: Option<&&'static str>) -> Ordering {
        a.cmp(&b)
    }

    #[tokio::test]
    async fn completed_operation_still_yields_under_key() {
        let dispatcher = ManualDispatcher::new();
        let mailbox = Mailbox::<&'static str>::builder()
            .dispatcher(dispatcher.clone())
            .build_priority(ordinal);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        mailbox
            .spawn(move |scope| async move {
                let value = std::future::ready(5)
                    .continue_with_context(&scope, "b")
                    .await;
                l.lock().unwrap().push(format!("task {value}"));
            })
            .unwrap();
        let l = log.clone();
        mailbox
            .execute_with_context("a", move || l.lock().unwrap().push("a".to_string()))
            .unwrap();

        // The task's first turn runs before "a", but its continuation waits behind it.
        dispatcher.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["a", "task 5"]);
    }

    #[tokio::test]
    async fn failure_is_delivered_on_the_continuation_turn() {
        let dispatcher = ManualDispatcher::new();
        let mailbox = Mailbox::<u8>::builder()
            .dispatcher(dispatcher.clone())
            .build_priority(NaturalOrder);
        let (tx, rx) = oneshot::channel::<()>();

        let handle = mailbox
            .spawn(move |scope| async move { rx.continue_with_context(&scope, 3).await.is_err() })
            .unwrap();
        dispatcher.run_all();

        drop(tx);
        assert_eq!(mailbox.pending(), 1);
        dispatcher.run_all();
        assert_eq!(handle.await, Ok(true));
    }

    #[tokio::test]
    async fn pending_operation_resumes_in_key_order() {
        let dispatcher = ManualDispatcher::new();
        let mailbox = Mailbox::<&'static str>::builder()
            .dispatcher(dispatcher.clone())
            .build_priority(NaturalOrder);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx_b, rx_b) = oneshot::channel::<()>();
        let (tx_a, rx_a) = oneshot::channel::<()>();

        for (key, rx) in [("b", rx_b), ("a", rx_a)] {
            let l = log.clone();
            mailbox
                .spawn(move |scope| async move {
                    let _ = rx.continue_with_context(&scope, key).await;
                    l.lock().unwrap().push(key);
                })
                .unwrap();
        }
        dispatcher.run_all();

        // Hold the drainer so both completions are queued before either runs.
        mailbox.execute(|| {}).unwrap();
        tx_b.send(()).unwrap();
        tx_a.send(()).unwrap();
        dispatcher.run_all();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(mailbox.pending(), 0);
    }
}
