//! # Mailboxes Sample App Library
//!
//! A lane-prioritized job service built on [`mailboxes::PriorityMailbox`]. This library
//! exposes its modules for integration testing.
//!
//! - **[model]**: [`JobRequest`](model::JobRequest) and [`JobReport`](model::JobReport).
//! - **[config]**: [`ServiceConfig`](config::ServiceConfig), lanes in priority order.
//! - **[service]**: [`JobService`](service::JobService), the mailbox-backed runner.
//! - **[client]**: the [`JobClient`](client::JobClient) trait callers program against.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod service;

pub use client::JobClient;
pub use config::ServiceConfig;
pub use error::JobError;
pub use model::{JobId, JobReport, JobRequest};
pub use service::JobService;
