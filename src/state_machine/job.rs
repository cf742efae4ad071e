use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consumable requirements of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Filament {
    pub color: String,
    pub material: String,
    #[serde(default)]
    pub process: String,
}

impl Filament {
    /// The part of the requirement that stays on the printer after a print.
    pub fn loaded(&self) -> LoadedFilament {
        LoadedFilament {
            color: self.color.clone(),
            material: self.material.clone(),
        }
    }
}

/// Consumables last used on a printer, used as a matching hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedFilament {
    pub color: String,
    pub material: String,
}

impl std::fmt::Display for LoadedFilament {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.color, self.material)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaxDimensions {
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub width: f64,
}

/// Lifecycle of a single print unit as mirrored to the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Idle,
    Dispatched,
    Printing,
    Succeeded,
    Canceled,
    Error,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Succeeded | UnitStatus::Canceled | UnitStatus::Error
        )
    }
}

/// Aggregate status of a job, derived from its units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Printing,
    Done,
    Failed,
}

/// One machine-ready file entry inside a stored job document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcodeFile {
    pub filename: String,
    /// Estimated print time in minutes.
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub status: UnitStatus,
    pub filament: Filament,
    #[serde(default, rename = "max_dim")]
    pub max_dimensions: MaxDimensions,
}

/// A job as stored in the job store: an ordered list of gcode files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "gcode")]
    pub files: Vec<GcodeFile>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: impl Into<String>, files: Vec<GcodeFile>) -> Self {
        let mut job = Self {
            id: id.into(),
            files,
            status: JobStatus::Queued,
            updated_at: None,
        };
        job.status = job.aggregate_status();
        job
    }

    /// Flatten the job into print units, in file order.
    pub fn units(&self) -> Vec<PrintUnit> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, file)| PrintUnit {
                job_id: self.id.clone(),
                unit_index: index,
                filename: file.filename.clone(),
                filament: file.filament.clone(),
                max_dimensions: file.max_dimensions,
                print_time: file.time,
                status: file.status,
            })
            .collect()
    }

    /// Merge one unit's status into the document. Returns `Some(true)` when the stored value
    /// changed, `Some(false)` when it already matched, `None` when the index does not exist.
    pub fn set_unit_status(&mut self, index: usize, status: UnitStatus) -> Option<bool> {
        let file = self.files.get_mut(index)?;
        if file.status == status {
            return Some(false);
        }
        file.status = status;
        self.status = self.aggregate_status();
        Some(true)
    }

    fn aggregate_status(&self) -> JobStatus {
        if self.files.iter().all(|f| f.status == UnitStatus::Idle) {
            return JobStatus::Queued;
        }
        if !self.files.iter().all(|f| f.status.is_terminal()) {
            return JobStatus::Printing;
        }
        if self.files.iter().any(|f| f.status == UnitStatus::Error) {
            JobStatus::Failed
        } else {
            JobStatus::Done
        }
    }
}

/// A single printable file extracted from a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintUnit {
    pub job_id: String,
    pub unit_index: usize,
    pub filename: String,
    pub filament: Filament,
    pub max_dimensions: MaxDimensions,
    pub print_time: f64,
    pub status: UnitStatus,
}

impl PrintUnit {
    /// Identity of the unit inside the job store.
    pub fn key(&self) -> (String, usize) {
        (self.job_id.clone(), self.unit_index)
    }

    /// Where the sliced file lives locally: `<root>/<job_id>/<filename>`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(&self.job_id).join(&self.filename)
    }
}
