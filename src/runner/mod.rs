//! Run controller module.
//!
//! This module drives a single classification run:
//! - RunController wiring load, resume, scheduling and checkpointing
//! - RunOptions for selecting input, output and row range
//! - RunSummary for final accounting and exit status

mod controller;

pub use controller::{RunController, RunOptions, RunOutcome, RunSummary};
