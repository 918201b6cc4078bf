//! Provider connection management
//!
//! One [`ConnectionManager`] owns the single duplex link to the provider. The
//! link is established lazily; concurrent callers share one in-flight attempt.
//! A reader task per link decodes every inbound frame in arrival order and
//! routes it to the registry, the correlator or a device session, so a device
//! is always registered before the list refresh that announced it resolves.
//!
//! State machine: `Disconnected -> Connecting -> Connected`, back to
//! `Disconnected` when the attempt fails, the transport drops or
//! [`ConnectionManager::disconnect`] is called. Nothing reconnects on its own;
//! the next operation that needs the link starts a new attempt.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use protocol::{Command, Frame, LogicalId, ProviderMessage};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot::error::RecvError;
use tracing::{debug, info, warn};

use super::correlator::{CorrelationKey, Correlator, FeatureReply};
use super::events::{ConnectionEvent, InputReportEvent, ObserverId, ObserverList};
use super::lock;
use super::registry::{DeviceRegistry, LogicalDeviceDescriptor};
use super::session::DeviceSession;
use super::transport::Connector;
use crate::authorization::Authorization;
use crate::blocklist;
use crate::error::{HidError, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<Arc<Link>>>>;

enum LinkState {
    Disconnected,
    Connecting(ConnectAttempt),
    Connected(Arc<Link>),
}

/// An established connection
pub(crate) struct Link {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Frame>,
}

impl Link {
    fn send(&self, command: Command) -> Result<()> {
        self.outgoing
            .send(command.encode())
            .map_err(|_| HidError::ProviderUnreachable("connection closed".to_string()))
    }
}

/// Shared state behind a [`ConnectionManager`]
pub(crate) struct Inner {
    connector: Arc<dyn Connector>,
    request_timeout: Option<Duration>,
    link: Mutex<LinkState>,
    /// Bumped for every attempt and every teardown
    generation: AtomicU64,
    registry: Mutex<DeviceRegistry>,
    correlator: Correlator,
    active_sessions: AtomicUsize,
    connection_observers: ObserverList<ConnectionEvent>,
    pub(crate) authorization: Arc<Authorization>,
}

/// Handle to the provider connection and everything multiplexed over it
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager; no connection is made until one is needed
    ///
    /// `request_timeout` bounds list refreshes and feature report reads.
    pub fn new(
        connector: Arc<dyn Connector>,
        authorization: Arc<Authorization>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                request_timeout,
                link: Mutex::new(LinkState::Disconnected),
                generation: AtomicU64::new(0),
                registry: Mutex::new(DeviceRegistry::new()),
                correlator: Correlator::new(),
                active_sessions: AtomicUsize::new(0),
                connection_observers: ObserverList::new(),
                authorization,
            }),
        }
    }

    /// Connect if not connected; concurrent callers share one attempt
    pub async fn ensure_connected(&self) -> Result<()> {
        self.inner.ensure_connected().await.map(|_| ())
    }

    /// Request a fresh device list and wait for it to complete
    ///
    /// Overlapping calls join the refresh already in flight. Returns the
    /// devices of the completed listing, blocked devices excluded.
    pub async fn refresh_device_list(&self) -> Result<Vec<Arc<DeviceSession>>> {
        self.inner.refresh_device_list().await
    }

    /// Refresh unless a session is open; returns the current listing
    pub async fn refresh_if_idle(&self) -> Result<Vec<Arc<DeviceSession>>> {
        self.inner.refresh_if_idle().await
    }

    /// Devices of the current listing without contacting the provider
    pub fn listed_devices(&self) -> Vec<Arc<DeviceSession>> {
        lock(&self.inner.registry).listed()
    }

    pub fn device(&self, logical_id: LogicalId) -> Option<Arc<DeviceSession>> {
        lock(&self.inner.registry).get(logical_id)
    }

    /// Tear the connection down, failing everything that waits on it
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        match &*lock(&self.inner.link) {
            LinkState::Disconnected => ConnectionState::Disconnected,
            LinkState::Connecting(_) => ConnectionState::Connecting,
            LinkState::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Number of currently open sessions
    pub fn active_sessions(&self) -> usize {
        self.inner.active_sessions.load(Ordering::SeqCst)
    }

    pub fn authorization(&self) -> &Arc<Authorization> {
        &self.inner.authorization
    }

    /// Observe device arrivals and removals, regardless of authorization
    pub fn add_connection_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.connection_observers.add(observer)
    }

    pub fn remove_connection_observer(&self, id: ObserverId) -> bool {
        self.inner.connection_observers.remove(id)
    }
}

impl Inner {
    pub(crate) async fn ensure_connected(self: &Arc<Self>) -> Result<Arc<Link>> {
        let attempt = {
            let mut state = lock(&self.link);
            let existing = match &*state {
                LinkState::Connected(link) => return Ok(link.clone()),
                LinkState::Connecting(attempt) => Some(attempt.clone()),
                LinkState::Disconnected => None,
            };
            match existing {
                Some(attempt) => attempt,
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let attempt =
                        establish(Arc::downgrade(self), self.connector.clone(), generation)
                            .boxed()
                            .shared();
                    *state = LinkState::Connecting(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        match &*lock(&self.link) {
            LinkState::Connected(link) => Some(link.clone()),
            _ => None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(&*lock(&self.link), LinkState::Connected(link) if link.generation == generation)
    }

    /// Send on the live link without reconnecting
    pub(crate) fn send(&self, command: Command) -> Result<()> {
        match self.current_link() {
            Some(link) => link.send(command),
            None => Err(HidError::ProviderUnreachable(
                "not connected to the HID provider".to_string(),
            )),
        }
    }

    async fn refresh_device_list(self: &Arc<Self>) -> Result<Vec<Arc<DeviceSession>>> {
        let link = self.ensure_connected().await?;

        let (pending, first) = self.correlator.register_list();
        if first {
            lock(&self.registry).begin_listing();
            debug!("Requesting device list");
            if let Err(e) = link.send(Command::List) {
                self.correlator.fail(CorrelationKey::List, e);
            }
        }
        self.await_correlation(CorrelationKey::List, "device list refresh", pending)
            .await?;

        Ok(lock(&self.registry).listed())
    }

    async fn refresh_if_idle(self: &Arc<Self>) -> Result<Vec<Arc<DeviceSession>>> {
        self.ensure_connected().await?;
        let active = self.active_sessions.load(Ordering::SeqCst);
        if active > 0 {
            debug!("Skipping list refresh, {} session(s) open", active);
            return Ok(lock(&self.registry).listed());
        }
        self.refresh_device_list().await
    }

    pub(crate) async fn read_feature_report(
        self: &Arc<Self>,
        session: &DeviceSession,
        report_id: u8,
    ) -> Result<FeatureReply> {
        let logical_id = session.logical_id();
        if !session.is_open() {
            return Err(HidError::NotOpen(logical_id));
        }

        let key = CorrelationKey::FeatureReport(logical_id);
        // The device slot is freed whenever `pending` is dropped
        let pending = self.correlator.register_feature_report(logical_id)?;
        self.send(Command::RequestFeatureReport(logical_id))?;

        let reply = self
            .await_correlation(key, "feature report read", pending)
            .await?;
        if reply.report_id != report_id {
            debug!(
                "Feature report reply for device {} carries report id {} (asked for {})",
                logical_id, reply.report_id, report_id
            );
        }
        Ok(reply)
    }

    async fn await_correlation<T, P>(
        &self,
        key: CorrelationKey,
        operation: &'static str,
        pending: P,
    ) -> Result<T>
    where
        P: Future<Output = std::result::Result<Result<T>, RecvError>>,
    {
        let outcome = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("{} timed out after {:?}", operation, timeout);
                    let err = HidError::Timeout { operation, timeout };
                    self.correlator.fail(key, err.clone());
                    return Err(err);
                }
            },
            None => pending.await,
        };
        outcome.unwrap_or_else(|_| {
            Err(HidError::ProviderUnreachable(format!(
                "{} abandoned",
                operation
            )))
        })
    }

    /// Flag a session open and count it; false if it already was
    pub(crate) fn mark_open(&self, session: &DeviceSession) -> bool {
        if !session.set_open(true) {
            return false;
        }
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Flag a session closed and uncount it; false if it already was
    pub(crate) fn mark_closed(&self, session: &DeviceSession) -> bool {
        if !session.set_open(false) {
            return false;
        }
        let _ = self
            .active_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        true
    }

    fn disconnect(&self) {
        let previous = std::mem::replace(&mut *lock(&self.link), LinkState::Disconnected);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if matches!(previous, LinkState::Disconnected) {
            return;
        }
        info!("Disconnecting from HID provider");
        self.teardown(HidError::ProviderUnreachable(
            "disconnected from the HID provider".to_string(),
        ));
    }

    fn on_link_lost(&self, generation: u64) {
        {
            let mut state = lock(&self.link);
            if !matches!(&*state, LinkState::Connected(link) if link.generation == generation) {
                return;
            }
            *state = LinkState::Disconnected;
        }
        warn!("Connection to HID provider lost");
        self.teardown(HidError::ProviderUnreachable(
            "connection to the HID provider was lost".to_string(),
        ));
    }

    /// Fail pending requests and close every open session
    fn teardown(&self, error: HidError) {
        let failed = self.correlator.fail_all(error);
        if failed > 0 {
            debug!("Failed {} pending request(s)", failed);
        }

        let sessions = lock(&self.registry).sessions();
        for session in sessions {
            if self.mark_closed(&session) {
                self.connection_observers
                    .notify(&ConnectionEvent::Disconnect(session));
            }
        }
        self.active_sessions.store(0, Ordering::SeqCst);
    }

    fn handle_frame(self: &Arc<Self>, frame: &Frame) {
        match protocol::decode(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) => warn!("Dropping malformed frame ({} bytes): {}", frame.len(), e),
        }
    }

    fn handle_message(self: &Arc<Self>, message: ProviderMessage) {
        match message {
            ProviderMessage::DeviceAnnounced(announcement) => {
                if blocklist::is_blocked(&announcement) {
                    debug!(
                        "Ignoring blocked device {} ({:04x}:{:04x})",
                        announcement.logical_id, announcement.vendor_id, announcement.product_id
                    );
                    return;
                }
                let descriptor = LogicalDeviceDescriptor::from(&announcement);
                lock(&self.registry).upsert(descriptor, &Arc::downgrade(self));
            }
            ProviderMessage::ListComplete => {
                let arrivals = lock(&self.registry).complete_listing();
                for session in arrivals {
                    info!("Device connected: {}", session.logical_id());
                    self.connection_observers
                        .notify(&ConnectionEvent::Connect(session));
                }
                if self.correlator.resolve_list() == 0 {
                    debug!("Unsolicited list completion");
                }
            }
            ProviderMessage::DeviceStopped { logical_id } => {
                let Some(session) = self.lookup(logical_id) else {
                    return;
                };
                if !self.mark_closed(&session) {
                    debug!("Device {} stopped while not open", logical_id);
                    return;
                }
                info!("Device {} stopped by provider", logical_id);
                self.correlator.fail(
                    CorrelationKey::FeatureReport(logical_id),
                    HidError::NotOpen(logical_id),
                );
                self.connection_observers
                    .notify(&ConnectionEvent::Disconnect(session));
            }
            ProviderMessage::InputReport {
                logical_id,
                report_id,
                data,
            } => {
                let Some(session) = self.lookup(logical_id) else {
                    return;
                };
                if !session.is_open() {
                    debug!("Dropping input report for closed device {}", logical_id);
                    return;
                }
                session.deliver_input_report(&InputReportEvent {
                    logical_id,
                    report_id,
                    data,
                });
            }
            ProviderMessage::FeatureReportReply {
                logical_id,
                report_id,
                data,
            } => {
                if !self
                    .correlator
                    .resolve_feature_report(logical_id, FeatureReply { report_id, data })
                {
                    debug!("Unsolicited feature report reply for device {}", logical_id);
                }
            }
        }
    }

    fn lookup(&self, logical_id: LogicalId) -> Option<Arc<DeviceSession>> {
        let session = lock(&self.registry).get(logical_id);
        if session.is_none() {
            debug!("Dropping frame for unknown device {}", logical_id);
        }
        session
    }
}

/// Run one connection attempt and install the resulting link
async fn establish(
    inner: Weak<Inner>,
    connector: Arc<dyn Connector>,
    generation: u64,
) -> Result<Arc<Link>> {
    let result = connector.connect().await;
    let Some(manager) = inner.upgrade() else {
        return Err(HidError::ProviderUnreachable(
            "connection manager dropped".to_string(),
        ));
    };

    let mut state = lock(&manager.link);
    let superseded = manager.generation.load(Ordering::SeqCst) != generation
        || !matches!(&*state, LinkState::Connecting(_));

    match result {
        Ok(_) if superseded => {
            debug!("Discarding superseded connection attempt");
            Err(HidError::ProviderUnreachable(
                "connection attempt was cancelled".to_string(),
            ))
        }
        Ok(channel) => {
            let link = Arc::new(Link {
                generation,
                outgoing: channel.outgoing,
            });
            *state = LinkState::Connected(link.clone());
            drop(state);

            tokio::spawn(read_loop(inner, generation, channel.incoming));
            Ok(link)
        }
        Err(e) => {
            if !superseded {
                *state = LinkState::Disconnected;
            }
            warn!("Failed to connect to HID provider: {}", e);
            Err(e.into())
        }
    }
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut incoming: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = incoming.recv().await {
        let Some(manager) = inner.upgrade() else {
            return;
        };
        if !manager.is_current(generation) {
            return;
        }
        manager.handle_frame(&frame);
    }

    if let Some(manager) = inner.upgrade() {
        manager.on_link_lost(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::MemoryAuthorizationStore;
    use crate::network::transport::{MemoryConnector, MemoryProvider, ProviderSide};
    use common::test_utils::{
        DEFAULT_TEST_TIMEOUT, create_mock_announcement, listing_frames, with_timeout,
    };
    use protocol::{encode_feature_report_reply, encode_input_report, encode_stopped};

    fn manager() -> (ConnectionManager, MemoryConnector, MemoryProvider) {
        let (connector, provider) = MemoryConnector::pair();
        let authorization =
            Arc::new(Authorization::load(Box::new(MemoryAuthorizationStore::new())).unwrap());
        let manager = ConnectionManager::new(Arc::new(connector.clone()), authorization, None);
        (manager, connector, provider)
    }

    /// Answer the next `list` with the given devices
    async fn serve_listing(side: &mut ProviderSide, devices: &[protocol::DeviceAnnouncement]) {
        assert_eq!(side.recv().await, Some(Frame::Text("list".to_string())));
        for frame in listing_frames(devices) {
            side.send(frame);
        }
    }

    #[tokio::test]
    async fn test_lazy_connect_and_listing() {
        let (manager, connector, mut provider) = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 0);

        let refresh = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh_device_list().await }
        });
        let mut side = provider.accept().await.unwrap();
        serve_listing(&mut side, &[create_mock_announcement(7, 100, 0x046D, 0xC52B)]).await;

        let devices = with_timeout(DEFAULT_TEST_TIMEOUT, refresh).await.unwrap().unwrap().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].logical_id(), LogicalId(7));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_stopped_for_closed_device_is_noop() {
        let (manager, _connector, mut provider) = manager();
        let refresh = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh_device_list().await }
        });
        let mut side = provider.accept().await.unwrap();
        serve_listing(&mut side, &[create_mock_announcement(7, 100, 1, 1)]).await;
        with_timeout(DEFAULT_TEST_TIMEOUT, refresh).await.unwrap().unwrap().unwrap();

        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        manager.add_connection_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        side.send(encode_stopped(LogicalId(7)));
        // Unknown ids and reports for closed devices are dropped too
        side.send(encode_stopped(LogicalId(99)));
        side.send(encode_input_report(LogicalId(7), None, &[1]));
        side.send(encode_feature_report_reply(LogicalId(7), 0, &[1]));
        side.send(Frame::Text("garbage".to_string()));

        // A later listing proves the frames above were processed
        let refresh = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh_device_list().await }
        });
        serve_listing(&mut side, &[create_mock_announcement(7, 100, 1, 1)]).await;
        with_timeout(DEFAULT_TEST_TIMEOUT, refresh).await.unwrap().unwrap().unwrap();

        assert_eq!(events.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let (manager, connector, _provider) = manager();
        connector.set_refusing(true);

        let result = manager.ensure_connected().await;
        assert!(matches!(result, Err(HidError::ProviderUnreachable(_))));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // No automatic retry; the next call makes a fresh attempt
        assert_eq!(connector.attempts(), 1);
        connector.set_refusing(false);
        manager.ensure_connected().await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_harmless() {
        let (manager, _connector, _provider) = manager();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_blocked_devices_are_not_listed() {
        let (manager, _connector, mut provider) = manager();
        let refresh = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh_device_list().await }
        });
        let mut side = provider.accept().await.unwrap();
        serve_listing(
            &mut side,
            &[
                create_mock_announcement(1, 1, 0x1050, 0x0407),
                create_mock_announcement(2, 2, 0x046D, 0xC52B),
            ],
        )
        .await;

        let devices = with_timeout(DEFAULT_TEST_TIMEOUT, refresh).await.unwrap().unwrap().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].logical_id(), LogicalId(2));
        assert!(manager.device(LogicalId(1)).is_none());
    }
}
