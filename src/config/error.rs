//! Configuration validation errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("runner.timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("logging.debug and logging.quiet cannot both be set")]
    ConflictingVerbosity,
}
