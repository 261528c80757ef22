//! # Mailboxes
//!
//! Serializing mailboxes for Rust: submit work from any number of threads or tasks and have
//! it executed one item at a time, in a deterministic order, as if on a single logical
//! thread. This is the actor-mailbox discipline without the rest of an actor framework.
//!
//! ## Two Orderings
//!
//! - [`Mailbox`] runs work in arrival order (FIFO).
//! - [`PriorityMailbox`] runs work by **context key** first, under an injected
//!   [`KeyComparer`], and by arrival order among equal keys.
//!
//! ## Submitting Work
//!
//! - **Actions**: [`Mailbox::execute`] / [`Mailbox::execute_with_context`] enqueue a closure.
//! - **Async computations**: [`Mailbox::spawn`] hands a future to the mailbox. Each step of
//!   it (the code between two `.await`s) runs as one mailbox item. Inside, the computation
//!   uses its [`Scope`] to give the turn back ([`Scope::turn`]) or to resume under another
//!   key ([`Scope::with_context`]).
//! - **Continuations**: any future can be awaited with
//!   [`ContinueWithContext::continue_with_context`], so the code after it resumes on the
//!   mailbox under the chosen key instead of wherever the operation completed.
//!
//! ```rust
//! use mailboxes::{ContinueWithContext, PriorityMailbox, TokioDispatcher};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "multi_thread")] async fn main() {
//! let mailbox = PriorityMailbox::<&'static str>::builder()
//!     .name("demo")
//!     .dispatcher(TokioDispatcher::current())
//!     .build_priority(mailboxes::NaturalOrder);
//!
//! let urgent = mailbox
//!     .spawn_with_context("a-urgent", |scope| async move {
//!         tokio::time::sleep(Duration::from_millis(1))
//!             .continue_with_context(&scope, "a-urgent")
//!             .await;
//!         "urgent done"
//!     })
//!     .unwrap();
//!
//! assert_eq!(urgent.await.unwrap(), "urgent done");
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - At most one **drain session** runs a mailbox's items at any instant.
//! - The producer that finds the mailbox idle claims the drainer role and hands the session
//!   to the mailbox's [`Dispatcher`]: [`Inline`] (run on the producer's thread, the default)
//!   or [`TokioDispatcher`] (run on tokio's blocking pool).
//! - The internal lock protects only the pending store and its flags; it is never held
//!   while user code runs.
//! - A suspended computation does not hold the mailbox: its next step is a new item.
//!
//! ## Error Handling
//!
//! Mailbox operations return [`MailboxError`]. The mailbox is transparent to payload
//! failures: a panicking payload is logged and skipped, and the drain loop carries on.
//!
//! ## Testing
//!
//! The [`mock`] module provides [`ManualDispatcher`](mock::ManualDispatcher), which lets a
//! test decide exactly when drain sessions run.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod mock;
pub mod priority;
pub mod store;
pub mod task;
pub mod tracing;

// Re-export core types for convenience
pub use context::{ContextContinuation, ContinueWithContext};
pub use dispatch::{Dispatcher, Drain, Inline, TokioDispatcher};
pub use error::MailboxError;
pub use mailbox::{Mailbox, MailboxBuilder};
pub use priority::{KeyComparer, NaturalOrder, PriorityMailbox, PriorityStore};
pub use store::{FifoStore, PendingItem, PendingStore};
pub use task::{Scope, TaskHandle, WithContext};
