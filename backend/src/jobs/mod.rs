//! Background jobs

pub mod progress_monitor;

pub use progress_monitor::{CycleReport, ProgressMonitor};
