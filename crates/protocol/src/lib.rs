//! Wire protocol for the HID bridge
//!
//! This crate defines the messages exchanged between the HID bridge client and
//! the local device provider, and the codec that turns them into frames.
//!
//! The provider connection carries two shapes of frames:
//! - text frames: colon-delimited provider messages (`dev:...`, `stopped:...`)
//!   and four-letter client commands (`list`, `open7`, `clse7`, `rcfr7`)
//! - binary frames: fixed-layout report frames with a kind byte and a
//!   big-endian logical device id
//!
//! # Example
//!
//! ```
//! use protocol::{Frame, LogicalId, ProviderMessage, decode, encode_open};
//!
//! let frame = encode_open(LogicalId(7));
//! assert_eq!(frame, Frame::Text("open7".to_string()));
//!
//! let message = decode(&Frame::Text("stopped:7".to_string())).unwrap();
//! assert_eq!(message, ProviderMessage::DeviceStopped { logical_id: LogicalId(7) });
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{
    decode, encode_close, encode_device_announcement, encode_feature_report_reply,
    encode_feature_report_request, encode_input_report, encode_list_complete,
    encode_list_request, encode_open, encode_report, encode_stopped,
};
pub use error::{ProtocolError, Result};
pub use messages::{Command, Frame, ProviderMessage};
pub use types::{
    CollectionInfo, DeviceAnnouncement, InputFrameKind, LogicalId, PhysicalId, ReportInfo,
    ReportItem, ReportKind,
};
