mod job;
mod state;

pub use job::{
    Filament, GcodeFile, Job, JobStatus, LoadedFilament, MaxDimensions, PrintUnit, UnitStatus,
};
pub use state::{Event, PrinterState, RemoteState, StateMachine, Transition, state_from_report};
