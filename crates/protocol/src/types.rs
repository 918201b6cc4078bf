//! HID and protocol type definitions
//!
//! This module defines the identifiers and descriptor shapes carried by the
//! provider protocol, plus the report layout derived from an announcement.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical device identifier (provider-assigned)
///
/// Identifies one HID interface as exposed by the provider. The provider derives
/// it from the device path, so it is stable for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(pub u32);

/// Physical device identifier
///
/// Shared by every logical interface of one hardware unit. Authorization is
/// granted per physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalId(pub u32);

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind byte of an outgoing report frame (client -> provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReportKind {
    /// Output report, written to the interrupt OUT pipe
    Output = 0,
    /// Feature report write (SET_REPORT)
    Feature = 1,
}

/// Kind byte of an incoming binary frame (provider -> client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputFrameKind {
    /// Input report without a report id; payload at offset 5
    Legacy = 0,
    /// Input report with report id at offset 5; payload at offset 6
    WithReportId = 1,
    /// Feature report reply, report id at offset 5; payload at offset 6
    FeatureReply = 2,
}

impl InputFrameKind {
    /// Parse a kind byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Legacy),
            1 => Some(Self::WithReportId),
            2 => Some(Self::FeatureReply),
            _ => None,
        }
    }

    /// Offset of the first payload byte
    pub fn payload_offset(self) -> usize {
        match self {
            Self::Legacy => 5,
            Self::WithReportId | Self::FeatureReply => 6,
        }
    }
}

/// One `dev:` announcement from the provider
///
/// Report lengths are the provider's byte lengths and include the report id
/// byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAnnouncement {
    pub logical_id: LogicalId,
    pub physical_id: PhysicalId,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Product string, may be empty
    pub product_name: String,
    pub usage: u16,
    pub usage_page: u16,
    pub input_report_len: u16,
    pub output_report_len: u16,
    pub feature_report_len: u16,
    /// Report ids the device declares, in ascending order (empty if none)
    pub report_ids: Vec<u8>,
}

impl DeviceAnnouncement {
    /// Build the collection described by this announcement
    ///
    /// The provider announces a single top-level collection. Each report kind
    /// gets one report per declared report id, or a single report with id 0
    /// when the device does not number its reports.
    pub fn collection(&self) -> CollectionInfo {
        let reports = |len: u16| -> Vec<ReportInfo> {
            if self.report_ids.is_empty() {
                vec![ReportInfo::with_byte_length(0, len)]
            } else {
                self.report_ids
                    .iter()
                    .map(|&id| ReportInfo::with_byte_length(id, len))
                    .collect()
            }
        };

        CollectionInfo {
            usage: self.usage,
            usage_page: self.usage_page,
            input_reports: reports(self.input_report_len),
            output_reports: reports(self.output_report_len),
            feature_reports: reports(self.feature_report_len),
        }
    }
}

/// Usage/usage-page grouping with the report shapes it supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub usage: u16,
    pub usage_page: u16,
    pub input_reports: Vec<ReportInfo>,
    pub output_reports: Vec<ReportInfo>,
    pub feature_reports: Vec<ReportInfo>,
}

/// One report shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportInfo {
    /// Report id, 0 when the device has no numbered reports
    pub report_id: u8,
    pub items: Vec<ReportItem>,
}

impl ReportInfo {
    /// Build a report from a provider byte length
    ///
    /// The provider's length counts the report id byte; it is subtracted here
    /// and nowhere else.
    pub fn with_byte_length(report_id: u8, byte_length: u16) -> Self {
        Self {
            report_id,
            items: vec![ReportItem {
                report_size: 8,
                report_count: byte_length.saturating_sub(1),
            }],
        }
    }

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.items
            .iter()
            .map(|item| usize::from(item.report_size) * usize::from(item.report_count) / 8)
            .sum()
    }
}

/// Report item: `report_count` fields of `report_size` bits each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub report_size: u16,
    pub report_count: u16,
}
