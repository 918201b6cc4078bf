//! Event types and observer lists
//!
//! Observers are plain callbacks invoked synchronously, in registration order,
//! on the task that delivers the event. Each list also has one optional
//! handler slot, invoked after the registered observers.

use bytes::Bytes;
use protocol::LogicalId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::lock;
use super::session::DeviceSession;

/// Input report received for an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReportEvent {
    pub logical_id: LogicalId,
    /// `None` when the provider runs without report ids
    pub report_id: Option<u8>,
    pub data: Bytes,
}

/// Device arrival / removal
#[derive(Clone)]
pub enum ConnectionEvent {
    Connect(Arc<DeviceSession>),
    Disconnect(Arc<DeviceSession>),
}

impl ConnectionEvent {
    pub fn device(&self) -> &Arc<DeviceSession> {
        match self {
            ConnectionEvent::Connect(device) | ConnectionEvent::Disconnect(device) => device,
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, ConnectionEvent::Connect(_))
    }
}

impl std::fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_connect() { "Connect" } else { "Disconnect" };
        write!(f, "{}({})", kind, self.device().logical_id())
    }
}

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`ObserverList::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of event callbacks plus one handler slot
pub struct ObserverList<T> {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Observer<T>)>>,
    handler: Mutex<Option<Observer<T>>>,
}

impl<T> ObserverList<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        }
    }

    /// Register an observer; it stays registered until removed
    pub fn add<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.observers).push((id, Arc::new(observer)));
        id
    }

    /// Returns false if the observer was not registered
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Replace the handler slot
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        *lock(&self.handler) = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        *lock(&self.handler) = None;
    }

    /// Number of registered callbacks, handler slot included
    pub fn len(&self) -> usize {
        lock(&self.observers).len() + usize::from(lock(&self.handler).is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every observer, then the handler
    ///
    /// Callbacks run without any lock held, so they may add or remove
    /// observers; such changes apply from the next event on.
    pub fn notify(&self, event: &T) {
        let observers: Vec<Observer<T>> = lock(&self.observers)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        let handler = lock(&self.handler).clone();

        for observer in observers {
            observer(event);
        }
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observers_called_in_order_then_handler() {
        let list: ObserverList<u32> = ObserverList::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        list.set_handler(move |v| c.lock().unwrap().push(format!("handler:{}", v)));
        let c = calls.clone();
        list.add(move |v| c.lock().unwrap().push(format!("first:{}", v)));
        let c = calls.clone();
        list.add(move |v| c.lock().unwrap().push(format!("second:{}", v)));

        list.notify(&1);
        list.notify(&2);

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "first:1", "second:1", "handler:1", "first:2", "second:2", "handler:2"
            ]
        );
    }

    #[test]
    fn test_remove_observer() {
        let list: ObserverList<u32> = ObserverList::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = list.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        list.notify(&0);
        assert!(list.remove(id));
        assert!(!list.remove(id));
        list.notify(&0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_handler_slot_holds_one() {
        let list: ObserverList<u32> = ObserverList::new();
        list.set_handler(|_| {});
        list.set_handler(|_| {});
        assert_eq!(list.len(), 1);
        list.clear_handler();
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_observer_may_register_during_notify() {
        let list: Arc<ObserverList<u32>> = Arc::new(ObserverList::new());
        let inner = list.clone();
        list.add(move |_| {
            inner.add(|_| {});
        });
        list.notify(&0);
        assert_eq!(list.len(), 2);
    }
}
