use anyhow::Result;
use rag_platform::config::Settings;
use rag_platform::queue::IngestJob;
use rag_platform::state::AppState;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long `dequeue` blocks waiting for a job before looping back around to
/// check for shutdown/maintenance work.
const DEQUEUE_TIMEOUT_SECONDS: u64 = 5;

/// Cadence for sweeping budget reservations abandoned by crashed requests.
const MAINTENANCE_INTERVAL_SECONDS: u64 = 60;

/// A reservation older than this without being committed/released is
/// considered abandoned (matches `original_source/worker/maintenance.py`).
const RESERVATION_TTL_SECONDS: i64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_platform=debug".to_string()))
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("starting ingestion worker");

    let settings = Settings::load()?;
    let state = AppState::build(settings).await?;

    tokio::spawn(run_maintenance_loop(state.clone()));

    loop {
        match state.queue.dequeue(DEQUEUE_TIMEOUT_SECONDS).await {
            Ok(Some(job)) => {
                if let Err(e) = dispatch(&state, job.clone()).await {
                    error!(error = %e, job = ?job, "ingestion job failed");
                    mark_job_failed(&state, &job, &e).await;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "failed to dequeue ingestion job, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn dispatch(state: &AppState, job: IngestJob) -> Result<()> {
    match job {
        IngestJob::Extract { workspace_id, document_id } => state.extract_job.run(workspace_id, document_id).await,
        IngestJob::Index { workspace_id, document_id } => state.index_job.run(workspace_id, document_id).await,
    }
}

async fn mark_job_failed(state: &AppState, job: &IngestJob, error: &anyhow::Error) {
    let (workspace_id, document_id) = match job {
        IngestJob::Extract { workspace_id, document_id } | IngestJob::Index { workspace_id, document_id } => {
            (*workspace_id, *document_id)
        }
    };

    if let Err(e) = state
        .repository
        .update_document_status(workspace_id, document_id, "failed", Some(&error.to_string()))
        .await
    {
        warn!(error = %e, %document_id, "failed to record ingestion failure on document");
    }
}

async fn run_maintenance_loop(state: AppState) {
    let mut ticker = tokio::time::interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECONDS));
    loop {
        ticker.tick().await;
        // Sweeps every workspace in one pass; reservation rows carry their
        // own workspace_id so a single statement is enough.
        if let Err(e) = state.budget.sweep_stale_reservations(RESERVATION_TTL_SECONDS).await {
            warn!(error = %e, "budget reservation sweep failed");
        }
    }
}
