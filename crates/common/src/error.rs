//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A log filter directive could not be parsed
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    LoggingInitialized(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidFilter {
            filter: "loud".to_string(),
            reason: "invalid directive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid log filter 'loud': invalid directive"
        );
    }
}
