use mailboxes::tracing::setup_tracing;
use mailboxes_sample::{JobClient, JobRequest, JobService, ServiceConfig};
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    let config = ServiceConfig::from_env().map_err(|e| e.to_string())?;
    info!(lanes = ?config.lanes, chunk_units = config.chunk_units, "Starting job service");
    let service = JobService::new(config).map_err(|e| e.to_string())?;

    let lanes = service.config().lanes.clone();
    let lane = |rank: usize| lanes.get(rank).cloned();

    // Listed lowest priority first; the service still finishes them in lane order.
    let mut requests = vec![JobRequest::new("nightly-report", 6)];
    for (rank, name) in [(2, "reindex"), (1, "thumbnail"), (0, "password-reset")] {
        let mut request = JobRequest::new(name, 10).after_ms(5);
        request.lane = lane(rank);
        requests.push(request);
    }

    let span = tracing::info_span!("batch");
    let reports = service.run_batch(requests).instrument(span).await;

    for report in reports {
        match report {
            Ok(report) => info!(
                job = %report.name,
                lane = report.lane.as_deref().unwrap_or("-"),
                position = report.position,
                turns = report.turns,
                "Job done"
            ),
            Err(e) => error!(error = %e, "Job failed"),
        }
    }

    let single = service
        .run(JobRequest::new("cache-warmup", 3))
        .await
        .map_err(|e| e.to_string())?;
    info!(job = %single.name, id = %single.id, "Single job done");

    service.shutdown();
    info!("Application completed successfully");
    Ok(())
}
