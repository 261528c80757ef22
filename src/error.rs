//! # Mailbox Errors
//!
//! This module defines the error type shared by every mailbox operation. Payload failures
//! are not represented here: a payload reports its own outcome through its own channel,
//! such as a `TaskHandle` or a oneshot.

/// Errors reported by the mailbox itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox closed")]
    Closed,
    #[error("Mailbox task dropped before completion")]
    TaskDropped,
}
