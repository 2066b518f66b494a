//! database entities for the workflow substrate.

pub mod workflow_run;
pub mod workflow_signal;
