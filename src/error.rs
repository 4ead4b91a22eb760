//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    /// The graph substrate rejected or could not complete an operation.
    /// Propagated to the caller unmodified; retry policy is the caller's.
    #[error("storage error: {0}")]
    Storage(String),

    /// Input rejected before any write reached the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The NEXT chain of a session is not a single linear sequence.
    /// Fatal to the current operation; repair is an administrative task.
    #[error("chain integrity error: {0}")]
    ChainIntegrity(String),

    #[error("answer engine error: {0}")]
    Engine(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn storage_error_display() {
        let e = AppError::Storage("database is locked".into());
        assert!(e.to_string().contains("storage error"));
        assert!(e.to_string().contains("database is locked"));
    }

    #[test]
    fn invalid_argument_display() {
        let e = AppError::InvalidArgument("question must not be blank".into());
        assert!(e.to_string().contains("invalid argument"));
    }

    #[test]
    fn chain_integrity_display() {
        let e = AppError::ChainIntegrity("fork at message m1".into());
        assert!(e.to_string().contains("chain integrity"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        // satisfies std::error::Error trait
        let _: &dyn Error = &e;
    }
}
