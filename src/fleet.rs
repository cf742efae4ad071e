//! Process wiring for the CLI subcommands.
//!
//! `run` builds the shared structures once (store, registry, queue) and spawns the long-lived
//! tasks: job feed, fleet refresh and dispatcher. Each printer connection and each print runs
//! in its own task as well.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::FleetConfig;
use crate::dispatcher::Dispatcher;
use crate::feed::run_job_feed;
use crate::orchestrator::PrintOrchestrator;
use crate::printer::{HttpUploader, Uploader};
use crate::queue::GcodeQueue;
use crate::registry::Registry;
use crate::state_machine::{Filament, GcodeFile, Job, MaxDimensions, UnitStatus};
use crate::store::MemoryJobStore;
use crate::ui::Report;

/// Cancel the returned token on Ctrl-C.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
        }
        token_clone.cancel();
    });

    token
}

async fn connect_fleet(config: &FleetConfig) -> Result<Registry> {
    let uploader: Arc<dyn Uploader> =
        Arc::new(HttpUploader::new().context("failed to build upload client")?);
    if config.printers.is_empty() {
        tracing::warn!("No printers configured");
    }
    Ok(Registry::connect_all(&config.printers, uploader, config.timing().response_timeout).await)
}

/// Orchestrate until Ctrl-C. Prints already running are abandoned on exit.
pub async fn run(config: &FleetConfig) -> Result<()> {
    let timing = config.timing();
    let store = Arc::new(
        MemoryJobStore::open(&config.jobs_file)
            .await
            .with_context(|| format!("failed to open {}", config.jobs_file.display()))?,
    );
    let registry = Arc::new(connect_fleet(config).await?);
    let queue = Arc::new(GcodeQueue::new());
    let orchestrator = Arc::new(PrintOrchestrator::new(
        store.clone(),
        config.gcode_root.clone(),
        timing,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        orchestrator,
        timing,
    ));

    let cancel = install_shutdown_handler();
    let tasks = vec![
        tokio::spawn(run_job_feed(store, Arc::clone(&queue), cancel.clone())),
        tokio::spawn(Arc::clone(&registry).run_refresh(timing.refresh_interval, cancel.clone())),
        tokio::spawn(dispatcher.run(cancel.clone())),
    ];
    tracing::info!(
        printers = registry.len(),
        gcode_root = %config.gcode_root.display(),
        "Fleet running",
    );

    cancel.cancelled().await;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Task ended abnormally");
        }
    }
    tracing::info!(pending = queue.len(), "Fleet stopped");
    Ok(())
}

/// Connect to every printer, query it once and print a report.
pub async fn probe(config: &FleetConfig) -> Result<()> {
    let registry = connect_fleet(config).await?;
    let report = Report::default();

    for session in registry.sessions() {
        let mut info = None;
        let mut status = None;
        if session.is_reachable() {
            match session.request_klipper_info().await {
                Ok(i) => info = Some(i),
                Err(e) => tracing::warn!(printer = %session.name(), error = %e, "printer.info failed"),
            }
            match session.query_print_status().await {
                Ok(_) => status = session.last_status(),
                Err(e) => tracing::warn!(printer = %session.name(), error = %e, "Status query failed"),
            }
        }
        print!(
            "{}",
            report.printer(&session.snapshot(), info.as_ref(), status.as_ref())
        );
    }
    Ok(())
}

/// Build a one-file job with a fresh id.
pub fn single_file_job(filename: &str, filament: Filament, time: f64) -> Job {
    Job::new(
        Uuid::new_v4().to_string(),
        vec![GcodeFile {
            filename: filename.to_string(),
            time,
            status: UnitStatus::Idle,
            filament,
            max_dimensions: MaxDimensions::default(),
        }],
    )
}

/// Append a one-file job to the job file.
pub async fn add_job(jobs_file: &Path, job: Job) -> Result<Job> {
    let store = MemoryJobStore::open(jobs_file)
        .await
        .with_context(|| format!("failed to open {}", jobs_file.display()))?;
    store
        .insert_job(job.clone())
        .await
        .with_context(|| format!("failed to write {}", jobs_file.display()))?;
    println!("{}", Report::default().job_added(&job));
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::JobStatus;
    use crate::store::JobStore;

    fn filament() -> Filament {
        Filament {
            color: "black".into(),
            material: "PLA".into(),
            process: "FDM".into(),
        }
    }

    #[test]
    fn single_file_job_is_queued() {
        let job = single_file_job("benchy.gcode", filament(), 42.0);
        assert!(Uuid::parse_str(&job.id).is_ok());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.units()[0].filename, "benchy.gcode");
        assert_eq!(job.units()[0].print_time, 42.0);
    }

    #[tokio::test]
    async fn add_job_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let first = add_job(&path, single_file_job("a.gcode", filament(), 1.0))
            .await
            .unwrap();
        let second = add_job(&path, single_file_job("b.gcode", filament(), 2.0))
            .await
            .unwrap();

        let store = MemoryJobStore::open(&path).await.unwrap();
        assert_eq!(store.jobs().await.len(), 2);
        assert_eq!(store.get_job(&first.id).await.unwrap().files[0].filename, "a.gcode");
        assert_eq!(store.get_job(&second.id).await.unwrap().files[0].filename, "b.gcode");
    }

    #[tokio::test]
    async fn probe_reports_unreachable_printers() {
        let mut config = FleetConfig::default();
        config.printers = vec![crate::config::PrinterEndpoint::new("127.0.0.1", 9)];
        probe(&config).await.unwrap();
    }
}
