//! # Observability & Tracing
//!
//! Mailboxes log through the `tracing` crate with structured fields. Every event carries
//! the `mailbox` name given to [`MailboxBuilder::name`](crate::MailboxBuilder::name), so
//! several mailboxes can share one log stream.
//!
//! ## What Gets Traced
//!
//! - **DEBUG**: mailbox creation, drain sessions starting and finishing (with how many items
//!   ran), `close` (with how many items were discarded)
//! - **TRACE**: every enqueue (`sequence`, `has_key`, `claimed`) and every item run, mailbox
//!   task completion
//! - **WARN**: enqueues rejected by a closed mailbox, dropped task wake-ups
//! - **ERROR**: payloads and mailbox tasks that panicked
//!
//! ## Usage Examples
//!
//! ```bash
//! # Drain sessions only
//! RUST_LOG=mailboxes=debug cargo run -p mailboxes-sample
//!
//! # Every enqueue and every item
//! RUST_LOG=mailboxes=trace cargo run -p mailboxes-sample
//! ```
//!
//! With `RUST_LOG=mailboxes=trace` a short session reads like:
//!
//! ```text
//! TRACE Enqueued mailbox="jobs" sequence=0 has_key=true claimed=true
//! DEBUG Drain started mailbox="jobs"
//! TRACE Running mailbox="jobs" sequence=0
//! TRACE Enqueued mailbox="jobs" sequence=1 has_key=true claimed=false
//! TRACE Running mailbox="jobs" sequence=1
//! DEBUG Drain finished mailbox="jobs" ran=2
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Call once, at the start of a binary. A second call is ignored.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // every event already names its mailbox
        .compact()
        .try_init();
}
