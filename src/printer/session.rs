//! One live connection to one printer.
//!
//! [`PrinterSession`] owns the outbound half of the websocket (through an unbounded channel
//! drained by a writer task) and is fed every inbound frame by a reader task. Each frame is
//! decoded, classified, and applied: status responses drive the state machine, console lines
//! update the idle flag, and responses complete any waiter registered under their reserved id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use super::upload::Uploader;
use crate::config::PrinterEndpoint;
use crate::error::{FleetError, Result, UploadError};
use crate::rpc::{
    self, Envelope, KlipperInfo, Notification, Request, RequestId, ResponseResult,
    StatusQueryResult,
};
use crate::state_machine::{
    Event, LoadedFilament, PrintUnit, PrinterState, StateMachine, Transition, state_from_report,
};

/// Console marker meaning the machine is stationary and ready for the operator.
pub const IDLE_MARKER: &str = "IdleFlag:1.0";
/// Console marker meaning the machine is moving.
pub const ACTIVE_MARKER: &str = "IdleFlag:0.0";

pub const DISPLAY_DEFAULT_MACRO: &str = "DISPLAY_DEFAULT";
pub const FILE_PENDING_MACRO: &str = "FILE_PENDING_NOTIFICATION";

type Waiter = oneshot::Sender<Result<ResponseResult>>;

/// Point-in-time copy of a session's shared fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub name: String,
    pub state: PrinterState,
    pub filament_on_bed: Option<LoadedFilament>,
    pub reachable: bool,
    pub idle: bool,
    pub assigned: Option<(String, usize)>,
}

struct SessionState {
    state: PrinterState,
    filament_on_bed: Option<LoadedFilament>,
    reachable: bool,
    assigned: Option<(String, usize)>,
    last_status: Option<StatusQueryResult>,
    klipper_info: Option<KlipperInfo>,
}

pub struct PrinterSession {
    endpoint: PrinterEndpoint,
    name: String,
    inner: Mutex<SessionState>,
    idle: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<String>,
    waiters: Mutex<HashMap<RequestId, Vec<Waiter>>>,
    uploader: Arc<dyn Uploader>,
    response_timeout: Duration,
}

impl PrinterSession {
    /// Build a session without a socket. Outbound frames are delivered to the returned
    /// receiver and inbound frames are fed through [`handle_frame`](Self::handle_frame).
    pub fn new(
        endpoint: PrinterEndpoint,
        uploader: Arc<dyn Uploader>,
        response_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (idle, _) = watch::channel(false);
        let session = Arc::new(Self {
            name: endpoint.display_name(),
            endpoint,
            inner: Mutex::new(SessionState {
                state: PrinterState::Standby,
                filament_on_bed: None,
                reachable: true,
                assigned: None,
                last_status: None,
                klipper_info: None,
            }),
            idle,
            outbound,
            waiters: Mutex::new(HashMap::new()),
            uploader,
            response_timeout,
        });
        (session, outbound_rx)
    }

    /// Open the printer's websocket and start its reader and writer tasks.
    pub async fn connect(
        endpoint: PrinterEndpoint,
        uploader: Arc<dyn Uploader>,
        response_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let url = endpoint.websocket_url();
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| FleetError::Transport {
                    printer: endpoint.display_name(),
                    reason: e.to_string(),
                })?;

        let (session, outbound_rx) = Self::new(endpoint, uploader, response_timeout);
        tracing::info!(printer = %session.name, %url, "Connected to printer");

        let (sink, stream) = ws_stream.split();
        tokio::spawn(write_loop(Arc::downgrade(&session), sink, outbound_rx));
        tokio::spawn(read_loop(Arc::downgrade(&session), stream));
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_waiters(&self) -> MutexGuard<'_, HashMap<RequestId, Vec<Waiter>>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> PrinterState {
        self.lock().state
    }

    pub fn filament_on_bed(&self) -> Option<LoadedFilament> {
        self.lock().filament_on_bed.clone()
    }

    pub fn is_reachable(&self) -> bool {
        self.lock().reachable
    }

    pub fn idle_flag(&self) -> bool {
        *self.idle.borrow()
    }

    pub fn last_status(&self) -> Option<StatusQueryResult> {
        self.lock().last_status.clone()
    }

    pub fn klipper_info(&self) -> Option<KlipperInfo> {
        self.lock().klipper_info.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let idle = self.idle_flag();
        let inner = self.lock();
        SessionSnapshot {
            name: self.name.clone(),
            state: inner.state,
            filament_on_bed: inner.filament_on_bed.clone(),
            reachable: inner.reachable,
            idle,
            assigned: inner.assigned.clone(),
        }
    }

    fn transport_error(&self, reason: impl Into<String>) -> FleetError {
        FleetError::Transport {
            printer: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Exclude the session from matching and fail every pending waiter.
    pub fn mark_unreachable(&self, reason: &str) {
        let was_reachable = std::mem::replace(&mut self.lock().reachable, false);
        if was_reachable {
            tracing::error!(printer = %self.name, %reason, "Printer unreachable; excluded from matching");
        }
        let pending: Vec<Waiter> = self.lock_waiters().drain().flat_map(|(_, w)| w).collect();
        for waiter in pending {
            let _ = waiter.send(Err(self.transport_error(reason)));
        }
    }

    // ---- state machine ----

    fn transition(&self, event: Event) -> Result<PrinterState> {
        let (from, to) = {
            let mut inner = self.lock();
            let from = inner.state;
            match StateMachine::next(from, event)? {
                Transition::Next(to) => {
                    inner.state = to;
                    (from, to)
                }
                Transition::Stay => return Ok(from),
            }
        };
        tracing::info!(printer = %self.name, %from, %to, "Printer state changed");
        Ok(to)
    }

    /// Claim the session for `unit`. Succeeds only for a reachable, unassigned session in
    /// STANDBY, which moves to SETUP.
    pub fn try_assign(&self, unit: &PrintUnit) -> bool {
        {
            let mut inner = self.lock();
            if !inner.reachable || inner.assigned.is_some() {
                return false;
            }
            match StateMachine::next(inner.state, Event::Assign) {
                Ok(Transition::Next(next)) => {
                    inner.state = next;
                    inner.assigned = Some(unit.key());
                }
                _ => return false,
            }
        }
        tracing::info!(
            printer = %self.name,
            job_id = %unit.job_id,
            unit = unit.unit_index,
            "Printer state changed to SETUP for new unit",
        );
        true
    }

    /// COMPLETED/CANCELED/SETUP → RESETTING. Clears the idle flag so the reset waits for a
    /// fresh marker from the operator.
    pub fn begin_reset(&self) -> Result<PrinterState> {
        let (from, to) = {
            let mut inner = self.lock();
            let from = inner.state;
            if let Transition::Next(to) = StateMachine::next(from, Event::BeginReset)? {
                inner.state = to;
            }
            // Under the state lock: any marker sent once RESETTING is visible counts.
            self.idle.send_replace(false);
            (from, inner.state)
        };
        tracing::info!(printer = %self.name, %from, %to, "Printer state changed");
        Ok(to)
    }

    /// Forget any earlier idle marker. The next [`wait_for_idle`](Self::wait_for_idle) only
    /// returns once the printer reports idle again.
    pub fn clear_idle_flag(&self) {
        if self.idle.send_replace(false) {
            tracing::debug!(printer = %self.name, "Idle flag cleared");
        }
    }

    /// RESETTING → STANDBY. Records the consumables left on the bed when given.
    pub fn finish_reset(&self, filament: Option<LoadedFilament>) -> Result<()> {
        {
            let mut inner = self.lock();
            match StateMachine::next(inner.state, Event::ResetComplete)? {
                Transition::Next(next) => inner.state = next,
                Transition::Stay => {}
            }
            if let Some(filament) = filament {
                inner.filament_on_bed = Some(filament);
            }
            inner.assigned = None;
        }
        tracing::info!(printer = %self.name, "Printer back in STANDBY");
        Ok(())
    }

    /// Drop the unit claim without moving the state (the ERROR path).
    pub fn release_unit(&self) {
        self.lock().assigned = None;
    }

    /// Resuming a paused print is an operator decision; nothing is sent.
    pub fn resume(&self) -> Result<()> {
        tracing::warn!(printer = %self.name, "Resume requested; needs operator action");
        Err(FleetError::OperatorActionRequired {
            printer: self.name.clone(),
            action: "resume the paused print at the printer".into(),
        })
    }

    /// Leaving ERROR is an operator decision; nothing is sent.
    pub fn recover(&self) -> Result<()> {
        tracing::warn!(printer = %self.name, "Recovery requested; needs operator action");
        Err(FleetError::OperatorActionRequired {
            printer: self.name.clone(),
            action: "clear the printer error and restart the session".into(),
        })
    }

    // ---- inbound ----

    pub fn handle_frame(&self, text: &str) {
        self.handle_bytes(text.as_bytes());
    }

    /// Decode and apply one inbound frame. Malformed frames are logged and skipped.
    pub fn handle_bytes(&self, bytes: &[u8]) {
        match rpc::decode(bytes) {
            Ok(envelope) => self.apply(envelope),
            Err(e) => {
                tracing::warn!(
                    printer = %self.name,
                    error = %e,
                    raw_message = %String::from_utf8_lossy(bytes),
                    "Skipping malformed frame",
                );
            }
        }
    }

    fn apply(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response { id, result } => self.handle_response(id, result),
            Envelope::ErrorResponse { id, error } => {
                tracing::warn!(
                    printer = %self.name,
                    ?id,
                    code = error.code,
                    message = %error.message,
                    "Printer returned an error",
                );
                if let Some(request_id) = id.and_then(RequestId::from_code) {
                    self.resolve(request_id, || {
                        Err(FleetError::Rpc {
                            code: error.code,
                            message: error.message.clone(),
                        })
                    });
                }
            }
            Envelope::Notification(notification) => self.handle_notification(notification),
            Envelope::Request { id, method, .. } => {
                tracing::debug!(printer = %self.name, id, %method, "Ignoring request from printer");
            }
        }
    }

    fn handle_response(&self, id: u64, result: ResponseResult) {
        let Some(request_id) = RequestId::from_code(id) else {
            tracing::debug!(printer = %self.name, id, ?result, "Unrouted response");
            return;
        };

        match &result {
            ResponseResult::PrintStatus(status) => self.apply_status(status),
            ResponseResult::KlipperInfo(info) => {
                self.lock().klipper_info = Some(info.clone());
            }
            ResponseResult::Acknowledged(_) if request_id == RequestId::StartFilenamePrint => {
                if let Err(e) = self.transition(Event::PrintAcknowledged) {
                    tracing::debug!(printer = %self.name, error = %e, "Print ack outside SETUP");
                }
            }
            _ => {}
        }

        self.resolve(request_id, || Ok(result.clone()));
    }

    fn apply_status(&self, status: &StatusQueryResult) {
        let (reported, unknown) = state_from_report(status.print_state());
        if let Some(e) = unknown {
            tracing::warn!(printer = %self.name, error = %e, "Tracking print state as UNKNOWN");
        }
        self.lock().last_status = Some(status.clone());

        let before = self.state();
        match self.transition(Event::Report(reported)) {
            Ok(after) if after == before && reported != before => {
                if reported == PrinterState::Standby
                    && matches!(before, PrinterState::Printing | PrinterState::Paused)
                {
                    tracing::warn!(printer = %self.name, %before, "Ignoring standby report during print");
                } else {
                    tracing::trace!(printer = %self.name, %before, %reported, "Report did not move state");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(printer = %self.name, error = %e, "Rejected status report"),
        }
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::GcodeResponse(lines) => {
                for line in &lines {
                    self.scan_idle_marker(line);
                }
            }
            Notification::ProcStatUpdate(_) => {}
            Notification::Other { method, params } => {
                tracing::debug!(printer = %self.name, %method, ?params, "Unhandled notification");
            }
        }
    }

    fn scan_idle_marker(&self, line: &str) {
        let idle = if line.contains(IDLE_MARKER) {
            true
        } else if line.contains(ACTIVE_MARKER) {
            false
        } else {
            return;
        };
        let changed = self.idle.send_if_modified(|current| {
            let changed = *current != idle;
            *current = idle;
            changed
        });
        if changed {
            tracing::info!(printer = %self.name, idle, "Idle flag changed");
        }
    }

    fn resolve(&self, request_id: RequestId, outcome: impl Fn() -> Result<ResponseResult>) {
        let waiters = self.lock_waiters().remove(&request_id).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(outcome());
        }
    }

    // ---- outbound ----

    /// Transmit one request without waiting for its response.
    pub fn send(&self, request: &Request) -> Result<()> {
        if !self.is_reachable() {
            return Err(self.transport_error("printer unreachable"));
        }
        let text = request.to_json()?;
        tracing::debug!(printer = %self.name, id = request.id, method = ?request.method, "Sending request");
        self.outbound
            .send(text)
            .map_err(|_| self.transport_error("connection writer stopped"))
    }

    /// Transmit a request and wait for the response routed to its reserved id.
    async fn call(&self, request: Request) -> Result<ResponseResult> {
        let request_id = request.request_id().ok_or_else(|| {
            FleetError::MalformedEnvelope(format!("request id {} is not reserved", request.id))
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.lock_waiters();
            let slot = waiters.entry(request_id).or_default();
            slot.retain(|w| !w.is_closed());
            slot.push(tx);
        }
        self.send(&request)?;

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(self.transport_error("response waiter dropped")),
            Err(_) => Err(FleetError::ResponseTimeout {
                printer: self.name.clone(),
                id: request.id,
            }),
        }
    }

    /// Upload the unit's sliced file through the file transport.
    pub async fn upload_file(
        &self,
        unit: &PrintUnit,
        gcode_root: &Path,
    ) -> std::result::Result<(), UploadError> {
        let path = unit.local_path(gcode_root);
        tracing::info!(printer = %self.name, file = %path.display(), "Uploading file");
        self.uploader
            .upload(&self.endpoint.http_base_url(), &path)
            .await
    }

    /// Show the file and filament to load on the printer's display.
    pub fn send_display_notification(&self, unit: &PrintUnit) -> Result<()> {
        let script = format!(
            r#"DISPLAY_NOTIFICATION NAME="{}" COLOR="{}" MATERIAL="{}""#,
            unit.filename, unit.filament.color, unit.filament.material
        );
        self.send(&Request::gcode_script(RequestId::CustomNotification, script))
    }

    /// Ask the operator to confirm the pending file.
    pub fn send_file_pending_notification(&self) -> Result<()> {
        self.send(&Request::gcode_script(
            RequestId::FilePendingNotification,
            FILE_PENDING_MACRO,
        ))
    }

    pub fn send_default_display(&self) -> Result<()> {
        self.send(&Request::gcode_script(
            RequestId::DefaultDisplay,
            DISPLAY_DEFAULT_MACRO,
        ))
    }

    /// Fire-and-forget status query; the state updates when the answer arrives.
    pub fn request_print_status(&self) -> Result<()> {
        self.send(&Request::objects_query(RequestId::PrinterStatus))
    }

    /// Status query that waits for its answer and returns the resulting session state.
    pub async fn query_print_status(&self) -> Result<PrinterState> {
        match self
            .call(Request::objects_query(RequestId::PrintJobStatus))
            .await?
        {
            ResponseResult::PrintStatus(_) => Ok(self.state()),
            other => Err(FleetError::MalformedEnvelope(format!(
                "expected status result, got {other:?}"
            ))),
        }
    }

    pub async fn request_klipper_info(&self) -> Result<KlipperInfo> {
        match self.call(Request::printer_info()).await? {
            ResponseResult::KlipperInfo(info) => Ok(info),
            other => Err(FleetError::MalformedEnvelope(format!(
                "expected klipper info, got {other:?}"
            ))),
        }
    }

    /// Start printing an uploaded file and wait for the acknowledgement, which moves the
    /// session from SETUP to PRINTING.
    pub async fn start_filename_print(&self, filename: &str) -> Result<PrinterState> {
        self.call(Request::start_print(filename)).await?;
        Ok(self.state())
    }

    /// Wait until the idle flag is set, re-checking reachability every `check_every`.
    pub async fn wait_for_idle(&self, check_every: Duration) -> Result<()> {
        let mut rx = self.idle.subscribe();
        loop {
            let reached = tokio::time::timeout(check_every, rx.wait_for(|idle| *idle))
                .await
                .map(|r| r.is_ok());
            match reached {
                Ok(true) => return Ok(()),
                Ok(false) => return Err(self.transport_error("idle flag channel closed")),
                Err(_) if !self.is_reachable() => {
                    return Err(self.transport_error("connection lost while waiting for idle flag"));
                }
                Err(_) => {}
            }
        }
    }

    /// Poll the print status every `interval` until the session reaches a terminal state.
    /// Each poll's answer is applied before the next poll is sent.
    pub async fn poll_status_until_terminal(&self, interval: Duration) -> Result<PrinterState> {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let state = match self.query_print_status().await {
                Ok(state) => state,
                Err(FleetError::ResponseTimeout { .. }) => {
                    tracing::warn!(printer = %self.name, "Status poll timed out");
                    continue;
                }
                Err(e) => return Err(e),
            };
            tracing::debug!(printer = %self.name, %state, "Polled print status");

            if state.is_terminal() {
                return Ok(state);
            }
            if state == PrinterState::Paused {
                tracing::info!(printer = %self.name, "Print paused; waiting for operator to resume");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_filament_on_bed(&self, filament: Option<LoadedFilament>) {
        self.lock().filament_on_bed = filament;
    }
}

async fn write_loop<S>(
    session: Weak<PrinterSession>,
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<String>,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(text) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            if let Some(session) = session.upgrade() {
                session.mark_unreachable(&format!("write failed: {e}"));
            }
            return;
        }
    }
}

async fn read_loop<S>(session: Weak<PrinterSession>, mut stream: S)
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let reason = loop {
        let Some(frame) = stream.next().await else {
            break "connection closed".to_string();
        };
        let Some(session) = session.upgrade() else {
            return;
        };
        match frame {
            Ok(Message::Text(text)) => session.handle_frame(&text),
            Ok(Message::Binary(bytes)) => session.handle_bytes(&bytes),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                tracing::info!(printer = %session.name, ?frame, "Printer closed the connection");
                break "connection closed by printer".to_string();
            }
            Err(e) => break format!("read failed: {e}"),
        }
    };
    if let Some(session) = session.upgrade() {
        session.mark_unreachable(&reason);
    }
}
