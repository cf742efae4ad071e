//! Consumes the job store's change feed and keeps the gcode queue filled.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::queue::GcodeQueue;
use crate::state_machine::UnitStatus;
use crate::store::{JobChange, JobStore};

/// Apply one change to the queue.
pub fn apply_change(queue: &GcodeQueue, change: &JobChange) {
    match change {
        JobChange::Added(job) => {
            let mut queued = 0;
            for unit in job.units() {
                if unit.status == UnitStatus::Idle && queue.push(unit) {
                    queued += 1;
                }
            }
            tracing::info!(job_id = %job.id, queued, pending = queue.len(), "Job added");
        }
        JobChange::Removed(job) => {
            let purged = queue.remove_job(&job.id);
            tracing::info!(job_id = %job.id, purged, "Job removed");
        }
        JobChange::Modified(job) => {
            tracing::debug!(job_id = %job.id, status = ?job.status, "Job modified");
        }
    }
}

/// Run until cancelled or until the store closes its feed.
pub async fn run_job_feed(
    store: Arc<dyn JobStore>,
    queue: Arc<GcodeQueue>,
    cancel: CancellationToken,
) {
    let mut feed = store.subscribe().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = feed.next() => match change {
                Some(change) => apply_change(&queue, &change),
                None => {
                    tracing::warn!("Job feed closed");
                    break;
                }
            },
        }
    }
    tracing::debug!("Job feed consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Job;
    use crate::store::MemoryJobStore;
    use crate::test_support::job;
    use std::time::Duration;

    #[test]
    fn added_job_queues_idle_units_only() {
        let queue = GcodeQueue::new();
        let mut added: Job = job("a", 3);
        added.set_unit_status(1, UnitStatus::Succeeded);
        apply_change(&queue, &JobChange::Added(added.clone()));
        assert_eq!(queue.len(), 2);

        apply_change(&queue, &JobChange::Added(added));
        assert_eq!(queue.len(), 2);
        let indexes: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|u| u.unit_index)
            .collect();
        assert_eq!(indexes, vec![0, 2]);
    }

    #[test]
    fn removed_job_is_purged_and_modified_ignored() {
        let queue = GcodeQueue::new();
        apply_change(&queue, &JobChange::Added(job("a", 2)));
        apply_change(&queue, &JobChange::Added(job("b", 1)));
        apply_change(&queue, &JobChange::Modified(job("b", 5)));
        assert_eq!(queue.len(), 3);
        apply_change(&queue, &JobChange::Removed(job("a", 2)));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn consumer_follows_store_until_cancelled() {
        let store = Arc::new(MemoryJobStore::new());
        store.insert_job(job("a", 1)).await.unwrap();
        let queue = Arc::new(GcodeQueue::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_job_feed(
            store.clone(),
            Arc::clone(&queue),
            cancel.clone(),
        ));
        store.insert_job(job("b", 2)).await.unwrap();

        for _ in 0..100 {
            if queue.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(queue.len(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }
}
