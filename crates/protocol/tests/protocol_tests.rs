//! Integration tests for the provider wire protocol
//!
//! Covers the exact byte layouts the provider expects, the provider-side
//! encoders used by fixtures, and malformed-frame handling.

use bytes::Bytes;
use protocol::{
    Command, DeviceAnnouncement, Frame, LogicalId, PhysicalId, ProtocolError, ProviderMessage,
    ReportKind, decode, encode_device_announcement, encode_feature_report_reply,
    encode_input_report, encode_list_complete, encode_report, encode_stopped,
};

fn make_announcement(logical: u32, physical: u32) -> DeviceAnnouncement {
    DeviceAnnouncement {
        logical_id: LogicalId(logical),
        physical_id: PhysicalId(physical),
        vendor_id: 0x046D,
        product_id: 0xC52B,
        product_name: "USB Receiver".to_string(),
        usage: 1,
        usage_page: 1,
        input_report_len: 9,
        output_report_len: 9,
        feature_report_len: 9,
        report_ids: Vec::new(),
    }
}

mod wire_layout {
    use super::*;

    #[test]
    fn test_announcement_matches_provider_format() {
        let frame = encode_device_announcement(&make_announcement(7, 100));
        assert_eq!(
            frame,
            Frame::Text("dev:7:100:1133:50475:USB Receiver:1:1:9:9:9:".to_string())
        );
    }

    #[test]
    fn test_report_frame_big_endian_id() {
        let frame = encode_report(ReportKind::Output, LogicalId(0xDEAD_BEEF), 0, &[1, 2, 3]);
        let Frame::Binary(bytes) = frame else {
            panic!("report frames are binary");
        };
        assert_eq!(&bytes[..], &[0, 0xDE, 0xAD, 0xBE, 0xEF, 0, 1, 2, 3]);
    }

    #[test]
    fn test_feature_write_kind_byte() {
        let Frame::Binary(bytes) = Command::Report {
            kind: ReportKind::Feature,
            logical_id: LogicalId(1),
            report_id: 9,
            data: Bytes::from_static(&[0xFF]),
        }
        .encode() else {
            panic!("report frames are binary");
        };
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[5], 9);
        assert_eq!(bytes.len(), 7);
    }

    #[test]
    fn test_commands_have_no_delimiter() {
        for (command, expected) in [
            (Command::Open(LogicalId(12345)), "open12345"),
            (Command::Close(LogicalId(12345)), "clse12345"),
            (Command::RequestFeatureReport(LogicalId(12345)), "rcfr12345"),
            (Command::List, "list"),
        ] {
            assert_eq!(command.encode(), Frame::Text(expected.to_string()));
        }
    }
}

mod provider_encoders {
    use super::*;

    #[test]
    fn test_announcement_decodes_back() {
        let mut announcement = make_announcement(0xFFFF_FFFF, 0x8000_0001);
        announcement.report_ids = vec![1, 2, 255];
        announcement.product_name = "Pad: Pro".to_string();

        let decoded = decode(&encode_device_announcement(&announcement)).unwrap();
        assert_eq!(decoded, ProviderMessage::DeviceAnnounced(announcement));
    }

    #[test]
    fn test_list_complete_and_stopped_decode_back() {
        assert_eq!(
            decode(&encode_list_complete()).unwrap(),
            ProviderMessage::ListComplete
        );
        assert_eq!(
            decode(&encode_stopped(LogicalId(7))).unwrap(),
            ProviderMessage::DeviceStopped {
                logical_id: LogicalId(7)
            }
        );
    }

    #[test]
    fn test_input_report_kinds() {
        let legacy = encode_input_report(LogicalId(7), None, &[0xAA]);
        let Frame::Binary(ref bytes) = legacy else {
            panic!("binary expected");
        };
        assert_eq!(bytes[0], 0);
        assert_eq!(
            decode(&legacy).unwrap(),
            ProviderMessage::InputReport {
                logical_id: LogicalId(7),
                report_id: None,
                data: Bytes::from_static(&[0xAA]),
            }
        );

        let numbered = encode_input_report(LogicalId(7), Some(3), &[0xAA]);
        let Frame::Binary(ref bytes) = numbered else {
            panic!("binary expected");
        };
        assert_eq!(bytes[0], 1);
        assert_eq!(
            decode(&numbered).unwrap(),
            ProviderMessage::InputReport {
                logical_id: LogicalId(7),
                report_id: Some(3),
                data: Bytes::from_static(&[0xAA]),
            }
        );
    }

    #[test]
    fn test_feature_reply_scenario_frame() {
        // [2, 0,0,0,7, report id, payload...]
        let frame = encode_feature_report_reply(LogicalId(7), 0, &[0x10, 0x20]);
        assert_eq!(
            frame,
            Frame::Binary(Bytes::from_static(&[2, 0, 0, 0, 7, 0, 0x10, 0x20]))
        );
        assert_eq!(
            decode(&frame).unwrap(),
            ProviderMessage::FeatureReportReply {
                logical_id: LogicalId(7),
                report_id: 0,
                data: Bytes::from_static(&[0x10, 0x20]),
            }
        );
    }
}

mod malformed {
    use super::*;

    #[test]
    fn test_payload_slices_share_buffer() {
        let frame = Frame::Binary(Bytes::from(vec![0u8, 0, 0, 0, 1, 9, 9, 9]));
        let ProviderMessage::InputReport { data, .. } = decode(&frame).unwrap() else {
            panic!("input report expected");
        };
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_negative_and_overflowing_numbers_rejected() {
        for line in [
            "dev:-1:100:1:1:x:1:1:9:9:9",
            "dev:1:4294967296:1:1:x:1:1:9:9:9",
            "dev:1:1:1:1:x:1:1:9:9:9:256",
            "dev:1:1:1:1:x:1:1:9:9:9:1,,2",
            "stopped:abc",
        ] {
            let result = decode(&Frame::Text(line.to_string()));
            assert!(
                matches!(result, Err(ProtocolError::InvalidField { .. })),
                "{} should be rejected, got {:?}",
                line,
                result
            );
        }
    }

    #[test]
    fn test_truncated_announcement_names_missing_field() {
        let result = decode(&Frame::Text("dev:1:2:3:4:name:1:1:9:9".to_string()));
        assert_eq!(
            result,
            Err(ProtocolError::MissingField {
                command: "dev",
                field: "feature_report_len",
            })
        );
    }

    #[test]
    fn test_client_commands_are_not_provider_messages() {
        assert!(matches!(
            decode(&Frame::Text("list".to_string())),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }
}
