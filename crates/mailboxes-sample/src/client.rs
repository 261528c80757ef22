//! # Job Client
//!
//! [`JobClient`] is the awaitable face of the job service: callers submit a request and get
//! its report back. Code written against the trait can be exercised with a hand-rolled
//! client in tests instead of a live mailbox.

use crate::error::JobError;
use crate::model::{JobReport, JobRequest};
use crate::service::JobService;
use async_trait::async_trait;
use tracing::{debug, instrument};

#[async_trait]
pub trait JobClient: Send + Sync {
    /// Runs one job to completion.
    async fn run(&self, request: JobRequest) -> Result<JobReport, JobError>;

    /// Runs `requests` one after another, in list order.
    async fn run_batch(&self, requests: Vec<JobRequest>) -> Vec<Result<JobReport, JobError>> {
        let mut reports = Vec::with_capacity(requests.len());
        for request in requests {
            reports.push(self.run(request).await);
        }
        reports
    }
}

#[async_trait]
impl JobClient for JobService {
    #[instrument(skip(self))]
    async fn run(&self, request: JobRequest) -> Result<JobReport, JobError> {
        debug!("Submitting job");
        Ok(self.submit(request)?.await?)
    }

    /// Queues the whole batch up front: jobs finish in lane order, and results still come
    /// back in list order.
    #[instrument(skip(self, requests), fields(jobs = requests.len()))]
    async fn run_batch(&self, requests: Vec<JobRequest>) -> Vec<Result<JobReport, JobError>> {
        let count = requests.len();
        let handles = match self.submit_batch(requests).await {
            Ok(handles) => handles,
            Err(e) => return vec![Err(e); count],
        };

        let mut reports = Vec::with_capacity(count);
        for handle in handles {
            reports.push(match handle {
                Ok(handle) => handle.await.map_err(JobError::from),
                Err(e) => Err(e),
            });
        }
        reports
    }
}
