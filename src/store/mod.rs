//! The job store: source of jobs and sink of unit status.

mod memory;

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::error::{FleetError, Result};
use crate::state_machine::{Job, PrintUnit};

pub use memory::MemoryJobStore;

/// One change delivered by a [`JobFeed`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobChange {
    Added(Job),
    Modified(Job),
    Removed(Job),
}

impl JobChange {
    pub fn job(&self) -> &Job {
        match self {
            JobChange::Added(job) | JobChange::Modified(job) | JobChange::Removed(job) => job,
        }
    }
}

/// Subscription to a store's changes. Existing jobs are replayed as `Added` first.
pub struct JobFeed {
    backlog: VecDeque<JobChange>,
    live: broadcast::Receiver<JobChange>,
}

impl JobFeed {
    pub fn new(backlog: Vec<JobChange>, live: broadcast::Receiver<JobChange>) -> Self {
        Self {
            backlog: backlog.into(),
            live,
        }
    }

    /// Next change, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<JobChange> {
        if let Some(change) = self.backlog.pop_front() {
            return Some(change);
        }
        loop {
            match self.live.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job feed lagged; missed changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn subscribe(&self) -> JobFeed;

    async fn get_job(&self, id: &str) -> Result<Job>;

    /// Replace a stored job. Fails with `JobNotFound` if the job was removed.
    async fn set_job(&self, job: Job) -> Result<()>;
}

/// Mirror `unit.status` into its job document. Returns `false` without writing when the stored
/// status already matches.
pub async fn write_back_unit(store: &dyn JobStore, unit: &PrintUnit) -> Result<bool> {
    let mut job = store.get_job(&unit.job_id).await?;
    match job.set_unit_status(unit.unit_index, unit.status) {
        None => Err(FleetError::UnitNotFound {
            job_id: unit.job_id.clone(),
            index: unit.unit_index,
        }),
        Some(false) => Ok(false),
        Some(true) => {
            job.updated_at = Some(Utc::now());
            let aggregate = job.status;
            store.set_job(job).await?;
            tracing::debug!(
                job_id = %unit.job_id,
                unit = unit.unit_index,
                status = ?unit.status,
                job_status = ?aggregate,
                "Unit status written back",
            );
            Ok(true)
        }
    }
}
