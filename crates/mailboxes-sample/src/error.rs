//! Error types for the job service.

use mailboxes::MailboxError;
use thiserror::Error;

/// Errors that can occur while configuring the service or running jobs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    /// The request names a lane the service was not configured with.
    #[error("Unknown lane: {0}")]
    UnknownLane(String),

    /// The service configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The underlying mailbox rejected or dropped the job.
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}
