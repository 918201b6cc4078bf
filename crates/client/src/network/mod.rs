//! Network subsystem
//!
//! Handles the provider connection, device bookkeeping and report routing.

pub mod connection;
pub mod correlator;
pub mod events;
pub mod registry;
pub mod session;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export public types
pub use connection::{ConnectionManager, ConnectionState};
pub use correlator::{CorrelationKey, Correlator, FeatureReply};
pub use events::{ConnectionEvent, InputReportEvent, ObserverId, ObserverList};
pub use registry::{
    DeviceFilter, DeviceRegistry, LogicalDeviceDescriptor, group_by_physical_id, matches_filter,
    matches_filter_set,
};
pub use session::DeviceSession;
pub use transport::{
    Connector, FrameChannel, MemoryConnector, MemoryProvider, ProviderSide, TransportError,
    WebSocketConnector,
};

/// Lock a std mutex, recovering the data if a previous holder panicked
///
/// Critical sections in this crate never leave shared state half-updated, so
/// a poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
