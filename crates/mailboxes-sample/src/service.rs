//! # Job Service
//!
//! [`JobService`] runs jobs on a single [`PriorityMailbox`] keyed by lane rank. Each job is a
//! mailbox task: it processes `chunk_units` of work per turn and then yields, re-entering the
//! queue under its lane. An urgent job submitted while a bulk job is mid-flight therefore
//! overtakes it at the next turn boundary, yet no two jobs ever run at the same time and the
//! completion ledger needs no coordination beyond the mailbox itself.
//!
//! Jobs that wait on simulated I/O (`wait_ms`) resume under their lane through
//! [`ContinueWithContext`], so a burst of timers firing together is still served in lane
//! order.

use crate::config::ServiceConfig;
use crate::error::JobError;
use crate::model::{JobId, JobReport, JobRequest};
use mailboxes::{
    ContinueWithContext, Dispatcher, MailboxError, NaturalOrder, PriorityMailbox, Scope,
    TaskHandle, TokioDispatcher,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

/// Lane-prioritized job runner. Clones share the same mailbox and ledger.
#[derive(Clone)]
pub struct JobService {
    mailbox: PriorityMailbox<usize>,
    config: Arc<ServiceConfig>,
    ledger: Arc<Mutex<Vec<JobReport>>>,
    next_id: Arc<AtomicU64>,
}

impl JobService {
    /// Service draining on the current tokio runtime's blocking pool.
    pub fn new(config: ServiceConfig) -> Result<Self, JobError> {
        let dispatcher = TokioDispatcher::try_current().ok_or_else(|| {
            JobError::InvalidConfig("JobService::new needs a tokio runtime".into())
        })?;
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_dispatcher(
        config: ServiceConfig,
        dispatcher: impl Dispatcher,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let mailbox = PriorityMailbox::builder()
            .name(config.mailbox_name.clone())
            .dispatcher(dispatcher)
            .build_priority(NaturalOrder);
        info!(mailbox = %config.mailbox_name, lanes = ?config.lanes, "Job service started");

        Ok(Self {
            mailbox,
            config: Arc::new(config),
            ledger: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Queues a job. The returned handle resolves once the job has finished.
    #[instrument(skip(self, request), fields(job = %request.name, lane = ?request.lane))]
    pub fn submit(&self, request: JobRequest) -> Result<TaskHandle<JobReport>, JobError> {
        let rank = request
            .lane
            .as_deref()
            .map(|lane| {
                self.config
                    .rank(lane)
                    .ok_or_else(|| JobError::UnknownLane(lane.to_string()))
            })
            .transpose()?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = Job {
            id,
            request,
            rank,
            chunk_units: self.config.chunk_units,
            ledger: Arc::clone(&self.ledger),
        };
        let handle = match rank {
            Some(rank) => self
                .mailbox
                .spawn_with_context(rank, move |scope| job.run(scope))?,
            None => self.mailbox.spawn(move |scope| job.run(scope))?,
        };
        debug!(job_id = %id, "Job queued");
        Ok(handle)
    }

    /// Queues every request before any of them starts, so the batch runs in lane order
    /// rather than list order.
    ///
    /// The submissions happen inside one mailbox action, which runs behind any work already
    /// queued in a lane.
    pub async fn submit_batch(
        &self,
        requests: Vec<JobRequest>,
    ) -> Result<Vec<Result<TaskHandle<JobReport>, JobError>>, JobError> {
        let (sender, receiver) = oneshot::channel();
        let service = self.clone();
        self.mailbox.execute(move || {
            let handles = requests
                .into_iter()
                .map(|request| service.submit(request))
                .collect();
            let _ = sender.send(handles);
        })?;
        receiver
            .await
            .map_err(|_| JobError::Mailbox(MailboxError::TaskDropped))
    }

    /// Finished jobs in completion order.
    pub fn history(&self) -> Vec<JobReport> {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turns waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.mailbox.pending()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Stops accepting jobs and drops the turns still queued. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let discarded = self.mailbox.close();
        info!(mailbox = %self.config.mailbox_name, discarded, "Job service stopped");
        discarded
    }
}

struct Job {
    id: JobId,
    request: JobRequest,
    rank: Option<usize>,
    chunk_units: u32,
    ledger: Arc<Mutex<Vec<JobReport>>>,
}

impl Job {
    async fn run(self, scope: Scope<usize>) -> JobReport {
        let mut turns = 1;
        if self.request.wait_ms > 0 {
            let io = tokio::time::sleep(Duration::from_millis(self.request.wait_ms));
            match self.rank {
                Some(rank) => io.continue_with_context(&scope, rank).await,
                None => io.await,
            }
            turns += 1;
        }

        let units = self.request.work_units;
        let mut checksum = 0u64;
        let mut done = 0;
        while done < units {
            let end = done.saturating_add(self.chunk_units).min(units);
            for unit in done..end {
                checksum = checksum.wrapping_mul(31).wrapping_add(u64::from(unit) + 1);
            }
            done = end;
            if done < units {
                match self.rank {
                    Some(rank) => scope.with_context(rank).await,
                    None => scope.turn().await,
                }
                turns += 1;
            }
        }

        let report = {
            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            let report = JobReport {
                id: self.id,
                name: self.request.name,
                lane: self.request.lane,
                position: ledger.len() as u64,
                turns,
                checksum,
            };
            ledger.push(report.clone());
            report
        };
        debug!(job_id = %report.id, position = report.position, turns, "Job finished");
        report
    }
}
