//! Per-device sessions
//!
//! A [`DeviceSession`] is the handle for one logical device. Every operation
//! that needs the provider goes through the owning connection manager; the
//! session only holds a weak reference to it, so dropping the manager fails
//! further operations with `ProviderUnreachable` instead of keeping the
//! connection alive.

use bytes::Bytes;
use protocol::{CollectionInfo, Command, LogicalId, PhysicalId, ReportKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};
use tracing::{debug, info};

use super::connection::Inner;
use super::events::{InputReportEvent, ObserverId, ObserverList};
use super::registry::{DeviceFilter, LogicalDeviceDescriptor, matches_filter_set};
use crate::error::{HidError, Result};

/// Handle for one logical device
pub struct DeviceSession {
    descriptor: RwLock<LogicalDeviceDescriptor>,
    opened: AtomicBool,
    input_observers: ObserverList<InputReportEvent>,
    manager: Weak<Inner>,
}

impl DeviceSession {
    pub(crate) fn new(descriptor: LogicalDeviceDescriptor, manager: Weak<Inner>) -> Self {
        Self {
            descriptor: RwLock::new(descriptor),
            opened: AtomicBool::new(false),
            input_observers: ObserverList::new(),
            manager,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LogicalDeviceDescriptor> {
        self.descriptor.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn manager(&self) -> Result<Arc<Inner>> {
        self.manager.upgrade().ok_or_else(|| {
            HidError::ProviderUnreachable("connection manager was dropped".to_string())
        })
    }

    /// Replace static fields after a re-announcement
    pub(crate) fn refresh(&self, descriptor: LogicalDeviceDescriptor) {
        *self
            .descriptor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = descriptor;
    }

    /// Flip the open flag; false if it already had that value
    pub(crate) fn set_open(&self, open: bool) -> bool {
        self.opened
            .compare_exchange(!open, open, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn deliver_input_report(&self, event: &InputReportEvent) {
        self.input_observers.notify(event);
    }

    pub fn logical_id(&self) -> LogicalId {
        self.read().logical_id
    }

    pub fn physical_id(&self) -> PhysicalId {
        self.read().physical_id
    }

    pub fn vendor_id(&self) -> u16 {
        self.read().vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.read().product_id
    }

    pub fn product_name(&self) -> String {
        self.read().product_name.clone()
    }

    pub fn collections(&self) -> Vec<CollectionInfo> {
        self.read().collections.clone()
    }

    /// Snapshot of the descriptor
    pub fn descriptor(&self) -> LogicalDeviceDescriptor {
        self.read().clone()
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn matches(&self, filters: &[DeviceFilter]) -> bool {
        matches_filter_set(&self.read(), filters)
    }

    /// Start receiving input reports
    ///
    /// Connects first if the link is down. The provider does not acknowledge
    /// `open`; the session counts as open once the command is queued.
    pub async fn open(&self) -> Result<()> {
        let logical_id = self.logical_id();
        if self.is_open() {
            return Err(HidError::AlreadyOpen(logical_id));
        }

        let manager = self.manager()?;
        manager.ensure_connected().await?;
        if !manager.mark_open(self) {
            return Err(HidError::AlreadyOpen(logical_id));
        }
        if let Err(e) = manager.send(Command::Open(logical_id)) {
            manager.mark_closed(self);
            return Err(e);
        }

        info!("Opened device {}", logical_id);
        Ok(())
    }

    /// Stop receiving input reports
    pub async fn close(&self) -> Result<()> {
        let logical_id = self.logical_id();
        let manager = self.manager()?;
        if !manager.mark_closed(self) {
            return Err(HidError::NotOpen(logical_id));
        }
        manager.send(Command::Close(logical_id))?;

        info!("Closed device {}", logical_id);
        Ok(())
    }

    /// Write an output report (fire-and-forget)
    pub async fn send_output_report(&self, report_id: u8, data: impl Into<Bytes>) -> Result<()> {
        self.send_report(ReportKind::Output, report_id, data.into())
    }

    /// Write a feature report (fire-and-forget)
    pub async fn send_feature_report(&self, report_id: u8, data: impl Into<Bytes>) -> Result<()> {
        self.send_report(ReportKind::Feature, report_id, data.into())
    }

    fn send_report(&self, kind: ReportKind, report_id: u8, data: Bytes) -> Result<()> {
        let logical_id = self.logical_id();
        if !self.is_open() {
            return Err(HidError::NotOpen(logical_id));
        }
        self.manager()?.send(Command::Report {
            kind,
            logical_id,
            report_id,
            data,
        })
    }

    /// Read a feature report
    ///
    /// Only one read per device may be outstanding. Nothing is sent when the
    /// session is not open.
    pub async fn read_feature_report(&self, report_id: u8) -> Result<Bytes> {
        let manager = self.manager()?;
        let reply = manager.read_feature_report(self, report_id).await?;
        Ok(reply.data)
    }

    /// Close if open, then revoke access to the whole physical device
    pub async fn forget(&self) -> Result<()> {
        if self.is_open() {
            if let Err(e) = self.close().await {
                debug!("Close before forget failed: {}", e);
            }
        }
        let manager = self.manager()?;
        manager.authorization.revoke(self.physical_id())?;
        Ok(())
    }

    pub fn add_input_report_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&InputReportEvent) + Send + Sync + 'static,
    {
        self.input_observers.add(observer)
    }

    pub fn remove_input_report_observer(&self, id: ObserverId) -> bool {
        self.input_observers.remove(id)
    }

    /// Single callback slot, invoked after the registered observers
    pub fn set_input_report_handler<F>(&self, handler: F)
    where
        F: Fn(&InputReportEvent) + Send + Sync + 'static,
    {
        self.input_observers.set_handler(handler);
    }

    pub fn clear_input_report_handler(&self) {
        self.input_observers.clear_handler();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let descriptor = self.read();
        f.debug_struct("DeviceSession")
            .field("logical_id", &descriptor.logical_id)
            .field("physical_id", &descriptor.physical_id)
            .field("vendor_id", &format_args!("{:04x}", descriptor.vendor_id))
            .field("product_id", &format_args!("{:04x}", descriptor.product_id))
            .field("product_name", &descriptor.product_name)
            .field("is_open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_announcement;

    fn detached(logical: u32) -> DeviceSession {
        DeviceSession::new(
            LogicalDeviceDescriptor::from(&create_mock_announcement(logical, 100, 0x046D, 0xC52B)),
            Weak::new(),
        )
    }

    #[tokio::test]
    async fn test_closed_session_rejects_reports() {
        let session = detached(7);
        assert_eq!(
            session.send_output_report(0, vec![1, 2]).await,
            Err(HidError::NotOpen(LogicalId(7)))
        );
        assert_eq!(
            session.send_feature_report(0, vec![1, 2]).await,
            Err(HidError::NotOpen(LogicalId(7)))
        );
    }

    #[tokio::test]
    async fn test_detached_session_reports_unreachable() {
        let session = detached(7);
        assert!(matches!(
            session.open().await,
            Err(HidError::ProviderUnreachable(_))
        ));
        assert!(!session.is_open());
    }

    #[test]
    fn test_set_open_transitions_once() {
        let session = detached(1);
        assert!(session.set_open(true));
        assert!(!session.set_open(true));
        assert!(session.is_open());
        assert!(session.set_open(false));
        assert!(!session.set_open(false));
    }

    #[test]
    fn test_refresh_keeps_open_state_and_observers() {
        let session = detached(1);
        session.set_open(true);
        session.add_input_report_observer(|_| {});

        let mut descriptor = session.descriptor();
        descriptor.product_name = "Renamed".to_string();
        session.refresh(descriptor);

        assert!(session.is_open());
        assert_eq!(session.product_name(), "Renamed");
        assert_eq!(session.input_observers.len(), 1);
    }

    #[test]
    fn test_handler_runs_after_observers() {
        let session = detached(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o = order.clone();
        session.set_input_report_handler(move |_| o.lock().unwrap().push("handler"));
        let o = order.clone();
        session.add_input_report_observer(move |_| o.lock().unwrap().push("observer"));

        session.deliver_input_report(&InputReportEvent {
            logical_id: LogicalId(1),
            report_id: None,
            data: Bytes::from_static(&[1]),
        });
        assert_eq!(*order.lock().unwrap(), vec!["observer", "handler"]);
    }
}
