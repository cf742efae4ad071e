use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::PrinterState;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Transport error on {printer}: {reason}")]
    Transport { printer: String, reason: String },

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Unknown print_stats state: {0:?}")]
    UnknownStatusString(String),

    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: PrinterState, event: String },

    #[error("Printer {printer} needs operator action: {action}")]
    OperatorActionRequired { printer: String, action: String },

    #[error("No response from {printer} to request {id}")]
    ResponseTimeout { printer: String, id: u64 },

    #[error("Printer returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unit {index} not found in job {job_id}")]
    UnitNotFound { job_id: String, index: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;

/// Failure of the file transport. Fatal to the unit being uploaded, never to the session.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("printer rejected upload (status {status}): {body}")]
    Rejected { status: u16, body: String },
}
