//! Configuration types and loading for step-runner

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{LoggingConfig, RunnerConfig, Settings};
