//! Device selection prompt
//!
//! When several physical devices match a request, the user picks one. The
//! prompt receives the candidates through a `watch` channel; the facade keeps
//! publishing fresh snapshots while the prompt is open, so devices plugged in
//! or removed meanwhile show up.

use async_trait::async_trait;
use protocol::PhysicalId;
use std::sync::Arc;
use tokio::sync::watch;

use crate::network::{DeviceSession, LogicalDeviceDescriptor};

/// One selectable physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCandidate {
    pub physical_id: PhysicalId,
    /// Product name of the first matching interface
    pub product_name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Matching interfaces of this device
    pub devices: Vec<LogicalDeviceDescriptor>,
}

impl PromptCandidate {
    /// Build from a non-empty group of sessions sharing one physical id
    pub fn from_group(physical_id: PhysicalId, sessions: &[Arc<DeviceSession>]) -> Self {
        let devices: Vec<LogicalDeviceDescriptor> =
            sessions.iter().map(|session| session.descriptor()).collect();
        let (product_name, vendor_id, product_id) = devices
            .first()
            .map(|d| (d.product_name.clone(), d.vendor_id, d.product_id))
            .unwrap_or_default();

        Self {
            physical_id,
            product_name,
            vendor_id,
            product_id,
            devices,
        }
    }

    /// Text shown for this candidate
    pub fn label(&self) -> String {
        let name = if self.product_name.is_empty() {
            "Unknown device"
        } else {
            self.product_name.as_str()
        };
        format!("{} ({:04x}:{:04x})", name, self.vendor_id, self.product_id)
    }
}

/// Result of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Selected(PhysicalId),
    Cancelled,
}

/// Asks the user to pick one of several devices
#[async_trait]
pub trait DevicePrompt: Send + Sync {
    /// Resolve once the user picks a device or dismisses the prompt
    ///
    /// `candidates` always holds the latest snapshot; a selection is checked
    /// against the snapshot current when the prompt resolves.
    async fn present(&self, candidates: watch::Receiver<Vec<PromptCandidate>>) -> PromptOutcome;
}

/// Prompt that always declines
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelPrompt;

#[async_trait]
impl DevicePrompt for CancelPrompt {
    async fn present(&self, _candidates: watch::Receiver<Vec<PromptCandidate>>) -> PromptOutcome {
        PromptOutcome::Cancelled
    }
}
