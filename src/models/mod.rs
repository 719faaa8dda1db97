//! Data models for the health-check harness
//!
//! This module contains all data structures used throughout the application.

mod tap;
mod test_result;

pub use tap::{Directive, Outcome, Plan, TapResult};
pub use test::{InvocationMode, Test};
pub use test_result::{JobState, RunEvent, RunSummary, TestReport};
