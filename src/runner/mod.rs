//! Step runner
//!
//! A [`Runner`] is built in two phases:
//! - build: `put`, `run`, `run_async`, `branch`, `switch` and `then` append
//!   steps to a plan without running any of them
//! - execute: [`Runner::finish`] drains the plan once, in order
//!
//! Async steps registered back to back form a batch. They run concurrently,
//! each on a snapshot of the changes taken when the batch was launched, and
//! are merged before the next non-async step runs. The first failing step
//! halts the whole run.
//!
//! # Example
//!
//! ```ignore
//! use step_runner::Runner;
//! use serde_json::json;
//!
//! let result = Runner::default()
//!     .put("value", 1)
//!     .run("double", |c| Ok(json!(c["value"].as_i64().unwrap_or(0) * 2)))
//!     .finish()
//!     .await;
//!
//! assert_eq!(result.unwrap()["double"], json!(2));
//! ```

mod builder;
mod engine;
mod result;
mod step;

pub use builder::Runner;
pub use result::{FailureReason, RunFailure};
pub use step::{AsyncStep, Changes, Continuation, StepOutcome, SyncStep, continuation};
