//! Client error types

use protocol::{LogicalId, PhysicalId};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the device-access API
///
/// `Clone` so a single transport failure can be handed to every caller
/// waiting on the connection or on a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HidError {
    /// Connection to the provider failed or dropped
    #[error("HID provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Device {0} is already open")]
    AlreadyOpen(LogicalId),

    #[error("Device {0} is not open")]
    NotOpen(LogicalId),

    /// A feature report read for this device has not been answered yet
    #[error("A feature report read is already pending for device {0}")]
    RequestInProgress(LogicalId),

    /// The prompt closed without a selection
    #[error("Device selection was cancelled")]
    UserCancelled,

    /// The prompt returned a device that was not offered
    #[error("Selected device {0} is not among the offered candidates")]
    InvalidSelection(PhysicalId),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Authorization store could not be read or written
    #[error("Authorization store error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, HidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            HidError::NotOpen(LogicalId(7)).to_string(),
            "Device 7 is not open"
        );
        let msg = HidError::Timeout {
            operation: "list refresh",
            timeout: Duration::from_millis(500),
        }
        .to_string();
        assert!(msg.contains("list refresh"));
        assert!(msg.contains("500ms"));
    }

    #[test]
    fn test_cancel_is_distinct_from_invalid_selection() {
        assert_ne!(
            HidError::UserCancelled,
            HidError::InvalidSelection(PhysicalId(1))
        );
    }
}
