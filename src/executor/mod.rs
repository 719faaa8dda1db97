//! Test execution engine
//!
//! Schedules test executables, aggregates their reports and drives the
//! run loop.

mod aggregate;
mod passthrough;
mod runner;
mod scheduler;

pub use runner::Runner;
