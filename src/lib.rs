//! Build-then-run step plans
//!
//! A [`Runner`] collects named steps (seeded values, sync and async
//! functions, conditional branches and switches) and runs them in order on
//! [`Runner::finish`]. The first failing step halts the run and the caller
//! gets back the step's name, the reason, and every value committed before
//! it.

pub mod changes;
pub mod config;
pub mod logging;
pub mod runner;

pub use config::{RunnerConfig, Settings};
pub use runner::{
    AsyncStep, Changes, Continuation, FailureReason, RunFailure, Runner, StepOutcome, SyncStep,
    continuation,
};
