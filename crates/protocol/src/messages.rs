//! Protocol message definitions
//!
//! [`Command`] is everything the client sends, [`ProviderMessage`] everything
//! it can receive. Both travel as [`Frame`]s.

use bytes::Bytes;

use crate::codec;
use crate::types::{DeviceAnnouncement, LogicalId, ReportKind};

/// One message on the provider connection
///
/// The connection is message-oriented and binary-safe; text and binary frames
/// are distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Frame size in bytes, for logging
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client -> provider commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enumerate devices; answered by announcements and a list-complete marker
    List,
    /// Start streaming input reports for a device
    Open(LogicalId),
    /// Stop streaming input reports for a device
    Close(LogicalId),
    /// Read a feature report; answered by a feature-report reply frame
    RequestFeatureReport(LogicalId),
    /// Output report or feature report write (fire-and-forget)
    Report {
        kind: ReportKind,
        logical_id: LogicalId,
        report_id: u8,
        data: Bytes,
    },
}

impl Command {
    /// Encode into a frame
    pub fn encode(&self) -> Frame {
        match self {
            Command::List => codec::encode_list_request(),
            Command::Open(id) => codec::encode_open(*id),
            Command::Close(id) => codec::encode_close(*id),
            Command::RequestFeatureReport(id) => codec::encode_feature_report_request(*id),
            Command::Report {
                kind,
                logical_id,
                report_id,
                data,
            } => codec::encode_report(*kind, *logical_id, *report_id, data),
        }
    }
}

/// Provider -> client messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderMessage {
    /// A device was announced (or re-announced) during a listing
    DeviceAnnounced(DeviceAnnouncement),
    /// End of a listing
    ListComplete,
    /// The provider stopped streaming a device (unplugged or read failure)
    DeviceStopped { logical_id: LogicalId },
    /// Input report; `report_id` is `None` on legacy frames
    InputReport {
        logical_id: LogicalId,
        report_id: Option<u8>,
        data: Bytes,
    },
    /// Reply to a feature report read
    FeatureReportReply {
        logical_id: LogicalId,
        report_id: u8,
        data: Bytes,
    },
}

impl ProviderMessage {
    /// Logical device the message addresses, if any
    pub fn logical_id(&self) -> Option<LogicalId> {
        match self {
            ProviderMessage::DeviceAnnounced(announcement) => Some(announcement.logical_id),
            ProviderMessage::ListComplete => None,
            ProviderMessage::DeviceStopped { logical_id }
            | ProviderMessage::InputReport { logical_id, .. }
            | ProviderMessage::FeatureReportReply { logical_id, .. } => Some(*logical_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_matches_codec() {
        assert_eq!(Command::List.encode(), Frame::Text("list".to_string()));
        assert_eq!(
            Command::Close(LogicalId(3)).encode(),
            Frame::Text("clse3".to_string())
        );
        assert_eq!(
            Command::RequestFeatureReport(LogicalId(3)).encode(),
            Frame::Text("rcfr3".to_string())
        );
    }

    #[test]
    fn test_logical_id_accessor() {
        assert_eq!(ProviderMessage::ListComplete.logical_id(), None);
        let stopped = ProviderMessage::DeviceStopped {
            logical_id: LogicalId(9),
        };
        assert_eq!(stopped.logical_id(), Some(LogicalId(9)));
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(Frame::Text("list".to_string()).len(), 4);
        assert!(Frame::Binary(Bytes::new()).is_empty());
    }
}
