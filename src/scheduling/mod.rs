//! Periodic task scheduling and the orchestrator owning the task lifecycle.

mod orchestrator;
mod periodic;

#[cfg(test)]
mod tests;

pub use orchestrator::{CommandError, Orchestrator, ShutdownReport};
pub use periodic::{DriftPolicy, PeriodicScheduler, PeriodicTask, TaskStats};
