//! Matches queued units to free printers.
//!
//! One unit is matched at a time. When no printer is free the dispatcher holds the queue
//! head, refreshing the fleet until one frees up; units already dispatched keep running in
//! their own tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Timing;
use crate::error::FleetError;
use crate::orchestrator::PrintOrchestrator;
use crate::printer::PrinterSession;
use crate::queue::GcodeQueue;
use crate::registry::Registry;
use crate::state_machine::{PrintUnit, PrinterState, UnitStatus};
use crate::store::write_back_unit;

/// Pick a printer for `unit`: a free printer whose bed already holds the unit's filament,
/// else any free printer. Free means reachable and in STANDBY.
pub fn select_printer<'a>(
    sessions: &'a [Arc<PrinterSession>],
    unit: &PrintUnit,
) -> Option<&'a Arc<PrinterSession>> {
    let wanted = unit.filament.loaded();
    let free = |s: &&Arc<PrinterSession>| s.is_reachable() && s.state() == PrinterState::Standby;

    sessions
        .iter()
        .filter(free)
        .find(|s| s.filament_on_bed().as_ref() == Some(&wanted))
        .or_else(|| sessions.iter().find(free))
}

enum Claim {
    Printer(Arc<PrinterSession>),
    JobRemoved,
    Cancelled,
}

pub struct Dispatcher {
    queue: Arc<GcodeQueue>,
    registry: Arc<Registry>,
    orchestrator: Arc<PrintOrchestrator>,
    timing: Timing,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<GcodeQueue>,
        registry: Arc<Registry>,
        orchestrator: Arc<PrintOrchestrator>,
        timing: Timing,
    ) -> Self {
        Self {
            queue,
            registry,
            orchestrator,
            timing,
        }
    }

    fn claim_printer(&self, unit: &PrintUnit) -> Option<Arc<PrinterSession>> {
        let session = select_printer(self.registry.sessions(), unit)?;
        session.try_assign(unit).then(|| Arc::clone(session))
    }

    /// Whether the unit's job is still in the store. Only a confirmed removal counts as gone.
    async fn job_exists(&self, unit: &PrintUnit) -> bool {
        match self.orchestrator.store().get_job(&unit.job_id).await {
            Ok(_) => true,
            Err(FleetError::JobNotFound(_)) => false,
            Err(e) => {
                tracing::warn!(job_id = %unit.job_id, error = %e, "Job lookup failed; keeping unit");
                true
            }
        }
    }

    /// Block until a printer is claimed for `unit`, its job is removed, or `cancel` fires.
    async fn wait_for_printer(&self, unit: &PrintUnit, cancel: &CancellationToken) -> Claim {
        let mut attempts: u64 = 0;
        loop {
            if !self.job_exists(unit).await {
                return Claim::JobRemoved;
            }
            if let Some(session) = self.claim_printer(unit) {
                return Claim::Printer(session);
            }
            if attempts == 0 {
                tracing::info!(
                    job_id = %unit.job_id,
                    unit = unit.unit_index,
                    "No printer available; holding queue head",
                );
            }
            attempts += 1;
            self.registry.refresh_all();
            tokio::select! {
                _ = cancel.cancelled() => return Claim::Cancelled,
                _ = tokio::time::sleep(self.timing.dispatch_retry) => {}
            }
        }
    }

    /// Dispatch at most one unit. Returns the handle of the spawned print task.
    pub async fn tick(&self, cancel: &CancellationToken) -> Option<JoinHandle<PrintUnit>> {
        let mut unit = self.queue.pop()?;

        let session = match self.wait_for_printer(&unit, cancel).await {
            Claim::Printer(session) => session,
            Claim::JobRemoved => {
                tracing::info!(job_id = %unit.job_id, unit = unit.unit_index, "Job removed; unit dropped");
                return None;
            }
            Claim::Cancelled => {
                self.queue.push_front(unit);
                return None;
            }
        };

        tracing::info!(
            job_id = %unit.job_id,
            unit = unit.unit_index,
            printer = %session.name(),
            filament = %unit.filament.loaded(),
            "Unit dispatched",
        );

        // Written before the print task starts so it cannot overwrite a later status.
        unit.status = UnitStatus::Dispatched;
        if let Err(e) = write_back_unit(self.orchestrator.store().as_ref(), &unit).await {
            tracing::warn!(job_id = %unit.job_id, unit = unit.unit_index, error = %e, "Dispatch write-back failed");
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        Some(tokio::spawn(async move {
            orchestrator.run_unit(session, unit).await
        }))
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.timing.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&cancel).await;
                }
            }
        }
        tracing::debug!(pending = self.queue.len(), "Dispatcher stopped");
    }
}
