use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::Timing;
use crate::error::FleetError;
use crate::printer::PrinterSession;
use crate::state_machine::{PrintUnit, PrinterState, UnitStatus};
use crate::store::{JobStore, write_back_unit};

/// Drives one print unit through upload, operator confirmation, printing and reset on the
/// printer it was assigned to.
pub struct PrintOrchestrator {
    store: Arc<dyn JobStore>,
    /// Root of the sliced files, laid out as `<root>/<job_id>/<filename>`.
    gcode_root: PathBuf,
    timing: Timing,
}

/// Map the terminal session state to the status stored for the unit.
pub fn unit_status_for(terminal: PrinterState) -> UnitStatus {
    match terminal {
        PrinterState::Completed => UnitStatus::Succeeded,
        PrinterState::Canceled => UnitStatus::Canceled,
        _ => UnitStatus::Error,
    }
}

impl PrintOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, gcode_root: impl Into<PathBuf>, timing: Timing) -> Self {
        Self {
            store,
            gcode_root: gcode_root.into(),
            timing,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run `unit` on `session`, which must already be in SETUP for it. Returns the unit with
    /// its final status. Failures never propagate: they end up in the unit's status.
    pub async fn run_unit(&self, session: Arc<PrinterSession>, mut unit: PrintUnit) -> PrintUnit {
        let span = tracing::info_span!(
            "print_unit",
            job_id = %unit.job_id,
            unit = unit.unit_index,
            printer = %session.name(),
        );
        self.execute(&session, &mut unit).instrument(span).await;
        unit
    }

    async fn execute(&self, session: &PrinterSession, unit: &mut PrintUnit) {
        // UPLOAD: a failed transfer abandons the unit without printing
        if let Err(e) = session.upload_file(unit, &self.gcode_root).await {
            tracing::error!(error = %e, "Upload failed; unit abandoned");
            self.abandon(session, unit).await;
            return;
        }

        // NOTIFY: tell the operator what to load and ask for confirmation. Only a marker
        // sent after this point counts as the confirmation.
        session.clear_idle_flag();
        let notified = session
            .send_display_notification(unit)
            .and_then(|()| session.send_file_pending_notification());
        if let Err(e) = notified {
            tracing::error!(error = %e, "Could not notify operator");
            self.abandon(session, unit).await;
            return;
        }

        // CONFIRM: the operator's acknowledgement arrives as the idle flag
        tracing::info!(file = %unit.filename, filament = %unit.filament.loaded(), "Waiting for operator confirmation");
        if let Err(e) = session.wait_for_idle(self.timing.idle_check_interval).await {
            tracing::error!(error = %e, "Printer lost before confirmation");
            self.abandon(session, unit).await;
            return;
        }

        // START
        let started = match session.start_filename_print(&unit.filename).await {
            Ok(PrinterState::Printing) => Ok(()),
            Ok(state) => Err(FleetError::InvalidTransition {
                from: state,
                event: "print acknowledged".into(),
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            tracing::error!(error = %e, "Print start failed");
            self.abandon(session, unit).await;
            return;
        }
        self.record(unit, UnitStatus::Printing).await;

        // MONITOR
        let terminal = match session
            .poll_status_until_terminal(self.timing.status_poll_interval)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Lost track of print");
                self.record(unit, UnitStatus::Error).await;
                session.release_unit();
                return;
            }
        };
        let status = unit_status_for(terminal);
        tracing::info!(%terminal, ?status, "Print finished");
        self.record(unit, status).await;

        if terminal == PrinterState::Error {
            tracing::error!("Printer left in ERROR for operator intervention");
            session.release_unit();
            return;
        }

        // RESET: wait for the operator to clear the bed
        self.reset(session, unit).await;
    }

    async fn reset(&self, session: &PrinterSession, unit: &PrintUnit) {
        if let Err(e) = session.begin_reset() {
            tracing::error!(error = %e, "Could not begin reset");
            return;
        }
        if let Err(e) = session.wait_for_idle(self.timing.idle_check_interval).await {
            tracing::error!(error = %e, "Printer lost during reset");
            return;
        }
        if let Err(e) = session.send_default_display() {
            tracing::warn!(error = %e, "Could not restore default display");
        }
        if let Err(e) = session.finish_reset(Some(unit.filament.loaded())) {
            tracing::error!(error = %e, "Could not finish reset");
        }
    }

    /// Mark the unit failed and hand the printer back without touching its filament record.
    async fn abandon(&self, session: &PrinterSession, unit: &mut PrintUnit) {
        self.record(unit, UnitStatus::Error).await;
        let released = session
            .begin_reset()
            .and_then(|_| session.finish_reset(None));
        if let Err(e) = released {
            tracing::error!(error = %e, "Could not release printer");
        }
    }

    async fn record(&self, unit: &mut PrintUnit, status: UnitStatus) {
        unit.status = status;
        if let Err(e) = write_back_unit(self.store.as_ref(), unit).await {
            tracing::warn!(error = %e, ?status, "Unit status write-back failed");
        }
    }
}
