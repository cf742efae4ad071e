use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::{JobChange, JobFeed, JobStore};
use crate::error::{FleetError, Result};
use crate::state_machine::Job;

const FEED_CAPACITY: usize = 256;

/// In-process job store, optionally persisted to a JSON file after every mutation.
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<String, Job>>,
    changes: broadcast::Sender<JobChange>,
    path: Option<PathBuf>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            changes,
            path: None,
        }
    }

    /// Load jobs from `path` (a JSON array) and persist back to it. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs: Vec<Job> = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => Vec::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), jobs = jobs.len(), "Opened job store");

        let mut store = Self::new();
        store.path = Some(path);
        *store.jobs.get_mut() = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Add or replace a job, emitting `Added` or `Modified`.
    pub async fn insert_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let change = if jobs.contains_key(&job.id) {
            JobChange::Modified(job.clone())
        } else {
            JobChange::Added(job.clone())
        };
        jobs.insert(job.id.clone(), job);
        self.persist(&jobs).await?;
        let _ = self.changes.send(change);
        Ok(())
    }

    pub async fn remove_job(&self, id: &str) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .remove(id)
            .ok_or_else(|| FleetError::JobNotFound(id.to_string()))?;
        self.persist(&jobs).await?;
        let _ = self.changes.send(JobChange::Removed(job.clone()));
        Ok(job)
    }

    async fn persist(&self, jobs: &BTreeMap<String, Job>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let all: Vec<&Job> = jobs.values().collect();
        let json = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn subscribe(&self) -> JobFeed {
        // Holding the read lock keeps the snapshot and the live stream contiguous.
        let jobs = self.jobs.read().await;
        let live = self.changes.subscribe();
        let backlog = jobs.values().cloned().map(JobChange::Added).collect();
        JobFeed::new(backlog, live)
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::JobNotFound(id.to_string()))
    }

    async fn set_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let Some(slot) = jobs.get_mut(&job.id) else {
            return Err(FleetError::JobNotFound(job.id));
        };
        *slot = job.clone();
        self.persist(&jobs).await?;
        let _ = self.changes.send(JobChange::Modified(job));
        Ok(())
    }
}
