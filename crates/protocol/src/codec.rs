//! Frame encoding and decoding
//!
//! # Text frames
//!
//! Client commands are a four-letter prefix followed directly by the decimal
//! logical id (`open7`, `clse7`, `rcfr7`), or the bare word `list`.
//!
//! Provider messages are colon-delimited:
//! ```text
//! dev:<id>:<phys>:<vid>:<pid>:<name>:<usage>:<usagePage>:<in>:<out>:<feat>[:<reportIdCsv>]
//! dev
//! stopped:<id>
//! ```
//!
//! # Binary frames
//!
//! ```text
//! client -> provider  [kind: u8 (0 output, 1 feature)][id: u32 BE][report id: u8][payload]
//! provider -> client  [kind: u8 (0 legacy, 1 with id, 2 feature reply)][id: u32 BE][report id: u8]?[payload]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str::FromStr;

use crate::error::{ProtocolError, Result};
use crate::messages::{Frame, ProviderMessage};
use crate::types::{DeviceAnnouncement, InputFrameKind, LogicalId, PhysicalId, ReportKind};

pub const LIST_COMMAND: &str = "list";
pub const OPEN_PREFIX: &str = "open";
pub const CLOSE_PREFIX: &str = "clse";
pub const FEATURE_REQUEST_PREFIX: &str = "rcfr";

const DEVICE_TAG: &str = "dev";
const STOPPED_TAG: &str = "stopped";

/// Header length of an outgoing report frame: kind + id + report id
pub const REPORT_HEADER_LEN: usize = 6;

/// Field names of a `dev:` announcement, in wire order
const ANNOUNCEMENT_FIELDS: [&str; 11] = [
    "logical_id",
    "physical_id",
    "vendor_id",
    "product_id",
    "product_name",
    "usage",
    "usage_page",
    "input_report_len",
    "output_report_len",
    "feature_report_len",
    "report_ids",
];

/// Number of fields after the product name, including the report id list
const TRAILING_FIELDS: usize = 6;

/// `list`
pub fn encode_list_request() -> Frame {
    Frame::Text(LIST_COMMAND.to_string())
}

/// `open<id>`
pub fn encode_open(logical_id: LogicalId) -> Frame {
    Frame::Text(format!("{}{}", OPEN_PREFIX, logical_id.0))
}

/// `clse<id>`
pub fn encode_close(logical_id: LogicalId) -> Frame {
    Frame::Text(format!("{}{}", CLOSE_PREFIX, logical_id.0))
}

/// `rcfr<id>`
pub fn encode_feature_report_request(logical_id: LogicalId) -> Frame {
    Frame::Text(format!("{}{}", FEATURE_REQUEST_PREFIX, logical_id.0))
}

/// Binary report frame
///
/// # Example
/// ```
/// use protocol::{Frame, LogicalId, ReportKind, encode_report};
///
/// let frame = encode_report(ReportKind::Feature, LogicalId(0x0102_0304), 5, &[0xAA]);
/// assert_eq!(
///     frame,
///     Frame::Binary(vec![1, 1, 2, 3, 4, 5, 0xAA].into())
/// );
/// ```
pub fn encode_report(
    kind: ReportKind,
    logical_id: LogicalId,
    report_id: u8,
    payload: &[u8],
) -> Frame {
    let mut frame = BytesMut::with_capacity(REPORT_HEADER_LEN + payload.len());
    frame.put_u8(kind as u8);
    frame.put_u32(logical_id.0);
    frame.put_u8(report_id);
    frame.put_slice(payload);
    Frame::Binary(frame.freeze())
}

/// Decode a provider frame
///
/// Unparseable text, short binary frames and unknown kinds are reported as
/// [`ProtocolError`]; callers log and drop them.
pub fn decode(frame: &Frame) -> Result<ProviderMessage> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(data) => decode_binary(data),
    }
}

fn decode_binary(data: &Bytes) -> Result<ProviderMessage> {
    let Some(&kind_byte) = data.first() else {
        return Err(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: 0,
        });
    };
    let kind =
        InputFrameKind::from_byte(kind_byte).ok_or(ProtocolError::UnknownFrameKind(kind_byte))?;

    let offset = kind.payload_offset();
    if data.len() < offset {
        return Err(ProtocolError::IncompleteFrame {
            expected: offset,
            actual: data.len(),
        });
    }

    let mut header = &data[1..offset];
    let logical_id = LogicalId(header.get_u32());
    let payload = data.slice(offset..);

    Ok(match kind {
        InputFrameKind::Legacy => ProviderMessage::InputReport {
            logical_id,
            report_id: None,
            data: payload,
        },
        InputFrameKind::WithReportId => ProviderMessage::InputReport {
            logical_id,
            report_id: Some(header.get_u8()),
            data: payload,
        },
        InputFrameKind::FeatureReply => ProviderMessage::FeatureReportReply {
            logical_id,
            report_id: header.get_u8(),
            data: payload,
        },
    })
}

fn decode_text(text: &str) -> Result<ProviderMessage> {
    let fields: Vec<&str> = text.split(':').collect();

    match fields[0] {
        DEVICE_TAG if fields.len() == 1 => Ok(ProviderMessage::ListComplete),
        DEVICE_TAG => decode_announcement(&fields).map(ProviderMessage::DeviceAnnounced),
        STOPPED_TAG => {
            let raw = fields.get(1).ok_or(ProtocolError::MissingField {
                command: STOPPED_TAG,
                field: "logical_id",
            })?;
            Ok(ProviderMessage::DeviceStopped {
                logical_id: LogicalId(parse_field(raw, "logical_id")?),
            })
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn decode_announcement(fields: &[&str]) -> Result<DeviceAnnouncement> {
    // fields[0] is the tag; the report id list is optional
    let required = ANNOUNCEMENT_FIELDS.len();
    if fields.len() < required {
        return Err(ProtocolError::MissingField {
            command: DEVICE_TAG,
            field: ANNOUNCEMENT_FIELDS[fields.len() - 1],
        });
    }

    // Names may contain ':'; with the id list present the trailing fields can
    // be taken from the end
    let (product_name, tail, report_ids) = if fields.len() == required {
        (fields[5].to_string(), &fields[6..required], "")
    } else {
        let tail_start = fields.len() - TRAILING_FIELDS;
        (
            fields[5..tail_start].join(":"),
            &fields[tail_start..fields.len() - 1],
            fields[fields.len() - 1],
        )
    };

    Ok(DeviceAnnouncement {
        logical_id: LogicalId(parse_field(fields[1], "logical_id")?),
        physical_id: PhysicalId(parse_field(fields[2], "physical_id")?),
        vendor_id: parse_field(fields[3], "vendor_id")?,
        product_id: parse_field(fields[4], "product_id")?,
        product_name,
        usage: parse_field(tail[0], "usage")?,
        usage_page: parse_field(tail[1], "usage_page")?,
        input_report_len: parse_field(tail[2], "input_report_len")?,
        output_report_len: parse_field(tail[3], "output_report_len")?,
        feature_report_len: parse_field(tail[4], "feature_report_len")?,
        report_ids: parse_report_ids(report_ids)?,
    })
}

fn parse_report_ids(csv: &str) -> Result<Vec<u8>> {
    if csv.is_empty() {
        return Ok(Vec::new());
    }
    csv.split(',')
        .map(|id| parse_field(id, "report_ids"))
        .collect()
}

fn parse_field<T: FromStr>(value: &str, field: &'static str) -> Result<T> {
    value.parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// Provider-side encoders. The client never sends these; they exist so fixtures
// and stand-in providers speak exactly what `decode` accepts.

/// `dev:<fields>` with the report id list always present
pub fn encode_device_announcement(announcement: &DeviceAnnouncement) -> Frame {
    let report_ids = announcement
        .report_ids
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",");

    Frame::Text(format!(
        "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
        DEVICE_TAG,
        announcement.logical_id.0,
        announcement.physical_id.0,
        announcement.vendor_id,
        announcement.product_id,
        announcement.product_name,
        announcement.usage,
        announcement.usage_page,
        announcement.input_report_len,
        announcement.output_report_len,
        announcement.feature_report_len,
        report_ids,
    ))
}

/// Bare `dev`
pub fn encode_list_complete() -> Frame {
    Frame::Text(DEVICE_TAG.to_string())
}

/// `stopped:<id>`
pub fn encode_stopped(logical_id: LogicalId) -> Frame {
    Frame::Text(format!("{}:{}", STOPPED_TAG, logical_id.0))
}

/// Input report frame; kind 1 when a report id is given, kind 0 otherwise
pub fn encode_input_report(logical_id: LogicalId, report_id: Option<u8>, payload: &[u8]) -> Frame {
    let kind = if report_id.is_some() {
        InputFrameKind::WithReportId
    } else {
        InputFrameKind::Legacy
    };
    let mut frame = BytesMut::with_capacity(kind.payload_offset() + payload.len());
    frame.put_u8(kind as u8);
    frame.put_u32(logical_id.0);
    if let Some(report_id) = report_id {
        frame.put_u8(report_id);
    }
    frame.put_slice(payload);
    Frame::Binary(frame.freeze())
}

/// Feature report reply frame (kind 2)
pub fn encode_feature_report_reply(logical_id: LogicalId, report_id: u8, payload: &[u8]) -> Frame {
    let mut frame = BytesMut::with_capacity(InputFrameKind::FeatureReply.payload_offset() + payload.len());
    frame.put_u8(InputFrameKind::FeatureReply as u8);
    frame.put_u32(logical_id.0);
    frame.put_u8(report_id);
    frame.put_slice(payload);
    Frame::Binary(frame.freeze())
}
