//! FIFO of print units waiting for a printer.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::state_machine::PrintUnit;

#[derive(Default)]
pub struct GcodeQueue {
    units: Mutex<VecDeque<PrintUnit>>,
}

impl GcodeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PrintUnit>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `unit`. Returns `false` if a unit with the same job and index is already queued.
    pub fn push(&self, unit: PrintUnit) -> bool {
        let mut units = self.lock();
        if units.iter().any(|u| u.key() == unit.key()) {
            return false;
        }
        units.push_back(unit);
        true
    }

    /// Put a unit back at the head, ahead of everything queued after it.
    pub fn push_front(&self, unit: PrintUnit) {
        let mut units = self.lock();
        if !units.iter().any(|u| u.key() == unit.key()) {
            units.push_front(unit);
        }
    }

    pub fn pop(&self) -> Option<PrintUnit> {
        self.lock().pop_front()
    }

    /// Drop every queued unit of `job_id`; returns how many were removed.
    pub fn remove_job(&self, job_id: &str) -> usize {
        let mut units = self.lock();
        let before = units.len();
        units.retain(|u| u.job_id != job_id);
        before - units.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
