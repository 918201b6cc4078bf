//! Test utilities for the HID bridge
//!
//! Provides provider-side fixtures and helper functions for testing across
//! crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_announcement;
//!
//! let device = create_mock_announcement(7, 100, 0x046D, 0xC52B);
//! assert_eq!(device.vendor_id, 0x046D);
//! ```

use protocol::{
    DeviceAnnouncement, Frame, LogicalId, PhysicalId, encode_device_announcement,
    encode_list_complete,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock announcement for a generic-desktop device
///
/// # Arguments
/// * `logical_id` - Provider-assigned interface id
/// * `physical_id` - Grouping id shared by interfaces of one unit
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
pub fn create_mock_announcement(
    logical_id: u32,
    physical_id: u32,
    vendor_id: u16,
    product_id: u16,
) -> DeviceAnnouncement {
    create_mock_announcement_with_usage(logical_id, physical_id, vendor_id, product_id, 0x01, 0x01)
}

/// Create a mock announcement with a specific top-level usage
pub fn create_mock_announcement_with_usage(
    logical_id: u32,
    physical_id: u32,
    vendor_id: u16,
    product_id: u16,
    usage_page: u16,
    usage: u16,
) -> DeviceAnnouncement {
    DeviceAnnouncement {
        logical_id: LogicalId(logical_id),
        physical_id: PhysicalId(physical_id),
        vendor_id,
        product_id,
        product_name: format!("Test Product {}", logical_id),
        usage,
        usage_page,
        input_report_len: 9,
        output_report_len: 9,
        feature_report_len: 9,
        report_ids: Vec::new(),
    }
}

/// Create a list of announcements, one physical device each
pub fn create_mock_device_list(count: u32) -> Vec<DeviceAnnouncement> {
    (1..=count)
        .map(|i| create_mock_announcement(i, 1000 + i, 0x1234, 0x5678 + i as u16))
        .collect()
}

/// Frames a provider sends in answer to `list`
pub fn listing_frames(devices: &[DeviceAnnouncement]) -> Vec<Frame> {
    devices
        .iter()
        .map(encode_device_announcement)
        .chain(std::iter::once(encode_list_complete()))
        .collect()
}

/// Run an async operation with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
