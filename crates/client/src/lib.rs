//! HID bridge client
//!
//! WebHID-style device access backed by a local provider process. The
//! provider enumerates HID devices and relays reports over one WebSocket; this
//! crate keeps a view of the available devices, enforces per-origin
//! authorization, multiplexes device sessions over the connection and pairs
//! requests with their replies.
//!
//! ```no_run
//! use client::{CancelPrompt, ClientConfig, DeviceFilter, Hid};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let hid = Hid::from_config(&ClientConfig::default(), Arc::new(CancelPrompt))?;
//! let devices = hid
//!     .request_device(&[DeviceFilter {
//!         vendor_id: Some(0x046D),
//!         ..Default::default()
//!     }])
//!     .await?;
//! for device in &devices {
//!     device.open().await?;
//!     device.send_output_report(0, vec![0x01, 0x02]).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod authorization;
pub mod blocklist;
pub mod config;
pub mod error;
pub mod hid;
pub mod network;
pub mod prompt;

pub use authorization::{
    Authorization, AuthorizationStore, FileAuthorizationStore, MemoryAuthorizationStore,
    StoreError,
};
pub use config::{ClientConfig, parse_filter};
pub use error::{HidError, Result};
pub use hid::Hid;
pub use network::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, DeviceFilter, DeviceSession,
    InputReportEvent, LogicalDeviceDescriptor, MemoryConnector, MemoryProvider, ObserverId,
    ProviderSide, TransportError, WebSocketConnector,
};
pub use prompt::{CancelPrompt, DevicePrompt, PromptCandidate, PromptOutcome};
