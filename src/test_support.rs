//! Test doubles shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::{PrinterEndpoint, Timing};
use crate::error::{Result, UploadError};
use crate::printer::session::FILE_PENDING_MACRO;
use crate::printer::{PrinterSession, Uploader};
use crate::rpc::RequestId;
use crate::state_machine::{
    Filament, GcodeFile, Job, MaxDimensions, PrintUnit, PrinterState, UnitStatus,
};
use crate::store::{JobFeed, JobStore, MemoryJobStore};

pub fn fast_timing() -> Timing {
    Timing {
        dispatch_interval: Duration::from_millis(20),
        status_poll_interval: Duration::from_millis(10),
        refresh_interval: Duration::from_millis(20),
        idle_check_interval: Duration::from_millis(5),
        response_timeout: Duration::from_millis(500),
        dispatch_retry: Duration::from_millis(10),
    }
}

pub fn unit(job_id: &str, color: &str, material: &str) -> PrintUnit {
    PrintUnit {
        job_id: job_id.into(),
        unit_index: 0,
        filename: "testing.gcode".into(),
        filament: Filament {
            color: color.into(),
            material: material.into(),
            process: "FDM".into(),
        },
        max_dimensions: MaxDimensions::default(),
        print_time: 30.0,
        status: UnitStatus::Idle,
    }
}

/// A job of `files` idle units; the first is `testing.gcode` in black PLA.
pub fn job(id: &str, files: usize) -> Job {
    let files = (0..files)
        .map(|i| GcodeFile {
            filename: if i == 0 {
                "testing.gcode".into()
            } else {
                format!("part-{i}.gcode")
            },
            time: 30.0,
            status: UnitStatus::Idle,
            filament: Filament {
                color: "black".into(),
                material: "PLA".into(),
                process: "FDM".into(),
            },
            max_dimensions: MaxDimensions {
                height: 10.0,
                length: 20.0,
                width: 20.0,
            },
        })
        .collect();
    Job::new(id, files)
}

#[derive(Default)]
pub struct FakeUploader {
    fail: bool,
    uploaded: Mutex<Vec<PathBuf>>,
}

impl FakeUploader {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn uploaded(&self) -> Vec<PathBuf> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, _base_url: &str, path: &Path) -> std::result::Result<(), UploadError> {
        if self.fail {
            return Err(UploadError::Rejected {
                status: 507,
                body: "insufficient storage".into(),
            });
        }
        self.uploaded.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

pub fn detached_session(name: &str) -> (Arc<PrinterSession>, mpsc::UnboundedReceiver<String>) {
    detached_session_with(name, Arc::new(FakeUploader::default()))
}

pub fn detached_session_with(
    name: &str,
    uploader: Arc<dyn Uploader>,
) -> (Arc<PrinterSession>, mpsc::UnboundedReceiver<String>) {
    let mut endpoint = PrinterEndpoint::new("127.0.0.1", 7125);
    endpoint.name = Some(name.to_string());
    PrinterSession::new(endpoint, uploader, fast_timing().response_timeout)
}

/// Job store that remembers every document written through `set_job`.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    writes: Mutex<Vec<Job>>,
}

impl RecordingStore {
    pub async fn insert_job(&self, job: Job) {
        self.inner.insert_job(job).await.unwrap();
    }

    pub async fn remove_job(&self, id: &str) {
        self.inner.remove_job(id).await.unwrap();
    }

    pub fn writes(&self) -> Vec<Job> {
        self.writes.lock().unwrap().clone()
    }

    /// Successive statuses written for unit `index`.
    pub fn unit_writes(&self, index: usize) -> Vec<UnitStatus> {
        let mut seen = Vec::new();
        let mut previous = UnitStatus::Idle;
        for job in self.writes() {
            let status = job.files[index].status;
            if status != previous {
                seen.push(status);
                previous = status;
            }
        }
        seen
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn subscribe(&self) -> JobFeed {
        self.inner.subscribe().await
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.inner.get_job(id).await
    }

    async fn set_job(&self, job: Job) -> Result<()> {
        self.writes.lock().unwrap().push(job.clone());
        self.inner.set_job(job).await
    }
}

/// How the fake printer answers.
#[derive(Debug, Clone, Default)]
pub struct FakePrinterScript {
    /// `print_stats.state` returned by successive print-job polls; the last one repeats.
    pub print_states: Vec<&'static str>,
    pub reject_start: bool,
    /// Do not answer the pending-confirmation macro with an idle marker.
    pub withhold_confirmation: bool,
    /// Send an idle marker once the session enters RESETTING.
    pub operator_clears_bed: bool,
}

#[derive(Default)]
pub struct FakePrinterLog {
    status_polls: AtomicUsize,
    print_starts: AtomicUsize,
    scripts: Mutex<Vec<String>>,
}

impl FakePrinterLog {
    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn print_starts(&self) -> usize {
        self.print_starts.load(Ordering::SeqCst)
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

fn ack(id: u64) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": "ok"}).to_string()
}

/// Console notification carrying the idle marker.
pub fn idle_frame() -> String {
    console("// IdleFlag:1.0")
}

fn console(line: &str) -> String {
    json!({"jsonrpc": "2.0", "method": "notify_gcode_response", "params": [line]}).to_string()
}

fn status(id: u64, state: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "eventtime": 100.0,
            "status": {
                "webhooks": {"state": "ready", "state_message": "Printer is ready"},
                "virtual_sdcard": {"progress": 0.5, "is_active": true, "file_position": 1024},
                "print_stats": {"filename": "testing.gcode", "state": state}
            }
        }
    })
    .to_string()
}

/// Answer every frame the session sends, feeding the replies back through `handle_frame`.
/// Unless withheld, the pending-confirmation macro is answered with the idle marker, as if the
/// operator confirmed at once.
pub fn spawn_fake_printer(
    session: Arc<PrinterSession>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    script: FakePrinterScript,
) -> Arc<FakePrinterLog> {
    let log = Arc::new(FakePrinterLog::default());
    let task_log = Arc::clone(&log);
    if script.operator_clears_bed {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            while session.state() != PrinterState::Resetting {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            session.handle_frame(&idle_frame());
        });
    }
    tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            let request: Value = serde_json::from_str(&text).unwrap();
            let id = request["id"].as_u64().unwrap();
            match request["method"].as_str().unwrap() {
                "printer.gcode.script" => {
                    let line = request["params"]["script"].as_str().unwrap().to_string();
                    task_log.scripts.lock().unwrap().push(line.clone());
                    session.handle_frame(&ack(id));
                    if line == FILE_PENDING_MACRO && !script.withhold_confirmation {
                        session.handle_frame(&idle_frame());
                    }
                }
                "printer.print.start" => {
                    task_log.print_starts.fetch_add(1, Ordering::SeqCst);
                    if script.reject_start {
                        session.handle_frame(
                            &json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "error": {"code": 400, "message": "File not found"}
                            })
                            .to_string(),
                        );
                    } else {
                        session.handle_frame(&ack(id));
                    }
                }
                "printer.objects.query" => {
                    let state = if id == RequestId::PrintJobStatus.code() {
                        let n = task_log.status_polls.fetch_add(1, Ordering::SeqCst);
                        script
                            .print_states
                            .get(n)
                            .or(script.print_states.last())
                            .copied()
                            .unwrap_or("standby")
                    } else {
                        "standby"
                    };
                    session.handle_frame(&status(id, state));
                }
                "printer.info" => {
                    session.handle_frame(
                        &json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "state": "ready",
                                "hostname": "fake-printer",
                                "software_version": "v0.12.0"
                            }
                        })
                        .to_string(),
                    );
                }
                other => panic!("unexpected method {other}"),
            }
        }
    });
    log
}
