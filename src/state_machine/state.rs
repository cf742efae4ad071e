use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// The states of one printer session.
///
/// A session flows through: STANDBY → SETUP → PRINTING → {COMPLETED, CANCELED} → RESETTING → STANDBY.
/// `Unknown` is the sentinel for a status string the firmware table does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterState {
    Standby,
    Setup,
    Printing,
    Paused,
    Completed,
    Canceled,
    Resetting,
    Error,
    Unknown,
}

impl PrinterState {
    pub const ALL: [PrinterState; 9] = [
        PrinterState::Standby,
        PrinterState::Setup,
        PrinterState::Printing,
        PrinterState::Paused,
        PrinterState::Completed,
        PrinterState::Canceled,
        PrinterState::Resetting,
        PrinterState::Error,
        PrinterState::Unknown,
    ];

    /// Completed, Canceled and Error end the monitoring loop for a unit.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PrinterState::Completed | PrinterState::Canceled | PrinterState::Error
        )
    }

    /// States in which status reports from the firmware drive the machine.
    fn follows_reports(self) -> bool {
        matches!(
            self,
            PrinterState::Printing | PrinterState::Paused | PrinterState::Unknown
        )
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterState::Standby => write!(f, "STANDBY"),
            PrinterState::Setup => write!(f, "SETUP"),
            PrinterState::Printing => write!(f, "PRINTING"),
            PrinterState::Paused => write!(f, "PAUSED"),
            PrinterState::Completed => write!(f, "COMPLETED"),
            PrinterState::Canceled => write!(f, "CANCELED"),
            PrinterState::Resetting => write!(f, "RESETTING"),
            PrinterState::Error => write!(f, "ERROR"),
            PrinterState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Values of `print_stats.state` as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Standby,
    Printing,
    Paused,
    Completed,
    Canceled,
    Error,
}

impl FromStr for RemoteState {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standby" => Ok(RemoteState::Standby),
            "printing" => Ok(RemoteState::Printing),
            "paused" => Ok(RemoteState::Paused),
            "completed" => Ok(RemoteState::Completed),
            "canceled" => Ok(RemoteState::Canceled),
            "error" => Ok(RemoteState::Error),
            other => Err(FleetError::UnknownStatusString(other.to_string())),
        }
    }
}

impl From<RemoteState> for PrinterState {
    fn from(remote: RemoteState) -> Self {
        match remote {
            RemoteState::Standby => PrinterState::Standby,
            RemoteState::Printing => PrinterState::Printing,
            RemoteState::Paused => PrinterState::Paused,
            RemoteState::Completed => PrinterState::Completed,
            RemoteState::Canceled => PrinterState::Canceled,
            RemoteState::Error => PrinterState::Error,
        }
    }
}

/// Map a raw `print_stats.state` string to a session state.
/// Unrecognized strings become `Unknown`; the parse error is returned alongside for logging.
pub fn state_from_report(raw: &str) -> (PrinterState, Option<FleetError>) {
    match raw.parse::<RemoteState>() {
        Ok(remote) => (remote.into(), None),
        Err(e) => (PrinterState::Unknown, Some(e)),
    }
}

/// Inputs that may move a printer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The dispatcher handed the session a unit.
    Assign,
    /// The printer acknowledged the print-start command.
    PrintAcknowledged,
    /// A status-query response, already mapped through the firmware table.
    Report(PrinterState),
    /// The unit left the printer; wait for the operator to clear the bed.
    BeginReset,
    /// The operator cleared the bed.
    ResetComplete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Assign => write!(f, "assign"),
            Event::PrintAcknowledged => write!(f, "print acknowledged"),
            Event::Report(state) => write!(f, "report {state}"),
            Event::BeginReset => write!(f, "begin reset"),
            Event::ResetComplete => write!(f, "reset complete"),
        }
    }
}

/// The result of evaluating an event against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state.
    Next(PrinterState),
    /// The event is accepted but does not move the session.
    Stay,
}

/// Transition table for printer sessions.
pub struct StateMachine;

impl StateMachine {
    /// Compute the transition for `event` in state `current`.
    ///
    /// - Local events (`Assign`, `PrintAcknowledged`, `BeginReset`, `ResetComplete`) are only
    ///   valid from their single source state(s); anything else is an `InvalidTransition`.
    /// - Reports drive the session only while a print is being tracked. Outside that window
    ///   they are accepted and ignored, and a `standby` report never leaves the window.
    pub fn next(current: PrinterState, event: Event) -> Result<Transition, FleetError> {
        use PrinterState::*;

        let transition = match (current, event) {
            (Standby, Event::Assign) => Transition::Next(Setup),
            (Setup, Event::PrintAcknowledged) => Transition::Next(Printing),
            (Setup | Completed | Canceled, Event::BeginReset) => Transition::Next(Resetting),
            (Resetting, Event::ResetComplete) => Transition::Next(Standby),
            (state, Event::Report(reported)) if state.follows_reports() => match reported {
                Standby | Setup | Resetting => Transition::Stay,
                reported if reported == state => Transition::Stay,
                reported => Transition::Next(reported),
            },
            (_, Event::Report(_)) => Transition::Stay,
            (from, event) => {
                return Err(FleetError::InvalidTransition {
                    from,
                    event: event.to_string(),
                });
            }
        };
        Ok(transition)
    }
}
