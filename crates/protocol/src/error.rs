//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
///
/// Every variant describes a frame the codec could not make sense of. The
/// connection treats all of them the same way: log and drop the frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Binary frame shorter than its kind requires
    #[error("Incomplete frame: expected at least {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Binary frame with a kind byte the client does not know
    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u8),

    /// Text frame with an unknown leading command
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    /// Text frame with too few colon-delimited fields
    #[error("Missing field {field} in {command:?} message")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    /// Field present but not a valid number of the expected width
    #[error("Invalid value {value:?} for field {field}")]
    InvalidField { field: &'static str, value: String },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::IncompleteFrame {
            expected: 6,
            actual: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Incomplete frame"));
        assert!(msg.contains('6'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_invalid_field_error() {
        let err = ProtocolError::InvalidField {
            field: "vendor_id",
            value: "abc".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("vendor_id"));
        assert!(msg.contains("abc"));
    }
}
