//! Device registry and filter matching
//!
//! The registry owns one [`DeviceSession`] per logical id ever announced on
//! this client. Sessions are never removed: a re-announcement refreshes the
//! static descriptor fields of the existing session, so open state and
//! observers survive list refreshes.

use protocol::{CollectionInfo, DeviceAnnouncement, LogicalId, PhysicalId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::connection::Inner;
use super::session::DeviceSession;

/// One exposed interface of a physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDeviceDescriptor {
    pub logical_id: LogicalId,
    pub physical_id: PhysicalId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: String,
    pub collections: Vec<CollectionInfo>,
}

impl From<&DeviceAnnouncement> for LogicalDeviceDescriptor {
    fn from(announcement: &DeviceAnnouncement) -> Self {
        Self {
            logical_id: announcement.logical_id,
            physical_id: announcement.physical_id,
            vendor_id: announcement.vendor_id,
            product_id: announcement.product_id,
            product_name: announcement.product_name.clone(),
            collections: vec![announcement.collection()],
        }
    }
}

/// Device selection filter
///
/// Absent fields match anything. Usage page and usage are matched against the
/// device's collections; at least one collection must match both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub usage_page: Option<u16>,
    pub usage: Option<u16>,
}

/// Whether a single filter matches a descriptor
pub fn matches_filter(descriptor: &LogicalDeviceDescriptor, filter: &DeviceFilter) -> bool {
    if filter.vendor_id.is_some_and(|v| v != descriptor.vendor_id) {
        return false;
    }
    if filter.product_id.is_some_and(|p| p != descriptor.product_id) {
        return false;
    }
    if filter.usage_page.is_none() && filter.usage.is_none() {
        return true;
    }

    descriptor.collections.iter().any(|collection| {
        filter.usage_page.is_none_or(|p| p == collection.usage_page)
            && filter.usage.is_none_or(|u| u == collection.usage)
    })
}

/// True iff `filters` is empty or any filter matches
pub fn matches_filter_set(descriptor: &LogicalDeviceDescriptor, filters: &[DeviceFilter]) -> bool {
    filters.is_empty() || filters.iter().any(|filter| matches_filter(descriptor, filter))
}

/// Group sessions by physical device, preserving first-seen order
pub fn group_by_physical_id(
    sessions: &[Arc<DeviceSession>],
) -> Vec<(PhysicalId, Vec<Arc<DeviceSession>>)> {
    let mut groups: Vec<(PhysicalId, Vec<Arc<DeviceSession>>)> = Vec::new();
    for session in sessions {
        let physical_id = session.physical_id();
        match groups.iter_mut().find(|(id, _)| *id == physical_id) {
            Some((_, members)) => members.push(session.clone()),
            None => groups.push((physical_id, vec![session.clone()])),
        }
    }
    groups
}

/// Known devices plus the current listing
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<LogicalId, Arc<DeviceSession>>,
    /// Devices announced since the last `begin_listing`, in announcement order
    staging: Vec<LogicalId>,
    /// Last completed listing, in announcement order
    listing: Vec<LogicalId>,
    /// Contents of the last completed listing, `None` before the first one
    completed: Option<HashSet<LogicalId>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new listing; announcements from here on form the next snapshot
    ///
    /// The previous snapshot stays visible until the new one completes.
    pub fn begin_listing(&mut self) {
        self.staging.clear();
    }

    /// Insert a device or refresh the static fields of a known one
    pub(crate) fn upsert(
        &mut self,
        descriptor: LogicalDeviceDescriptor,
        manager: &Weak<Inner>,
    ) -> Arc<DeviceSession> {
        let logical_id = descriptor.logical_id;
        let session = match self.devices.get(&logical_id) {
            Some(existing) => {
                existing.refresh(descriptor);
                existing.clone()
            }
            None => {
                debug!(
                    "New device {} ({:04x}:{:04x})",
                    logical_id, descriptor.vendor_id, descriptor.product_id
                );
                let session = Arc::new(DeviceSession::new(descriptor, manager.clone()));
                self.devices.insert(logical_id, session.clone());
                session
            }
        };

        if !self.staging.contains(&logical_id) {
            self.staging.push(logical_id);
        }
        session
    }

    /// Finish the current listing and make it the visible snapshot
    ///
    /// Returns the devices that were not part of the previous completed
    /// listing. The first completed listing reports no arrivals.
    pub fn complete_listing(&mut self) -> Vec<Arc<DeviceSession>> {
        let current: HashSet<LogicalId> = self.staging.iter().copied().collect();
        let arrivals = match &self.completed {
            Some(previous) => self
                .staging
                .iter()
                .filter(|id| !previous.contains(*id))
                .filter_map(|id| self.devices.get(id).cloned())
                .collect(),
            None => Vec::new(),
        };
        self.completed = Some(current);
        self.listing = std::mem::take(&mut self.staging);
        arrivals
    }

    pub fn get(&self, logical_id: LogicalId) -> Option<Arc<DeviceSession>> {
        self.devices.get(&logical_id).cloned()
    }

    /// Devices of the last completed listing, in announcement order
    pub fn listed(&self) -> Vec<Arc<DeviceSession>> {
        self.listing
            .iter()
            .filter_map(|id| self.devices.get(id).cloned())
            .collect()
    }

    /// Every known session
    pub fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Small value space so filters hit and miss with similar frequency
    fn id_strategy() -> impl Strategy<Value = u16> {
        0u16..4
    }

    fn filter_strategy() -> impl Strategy<Value = DeviceFilter> {
        (
            proptest::option::of(id_strategy()),
            proptest::option::of(id_strategy()),
            proptest::option::of(id_strategy()),
            proptest::option::of(id_strategy()),
        )
            .prop_map(|(vendor_id, product_id, usage_page, usage)| DeviceFilter {
                vendor_id,
                product_id,
                usage_page,
                usage,
            })
    }

    fn descriptor_strategy() -> impl Strategy<Value = LogicalDeviceDescriptor> {
        (
            id_strategy(),
            id_strategy(),
            proptest::collection::vec((id_strategy(), id_strategy()), 1..3),
        )
            .prop_map(|(vendor_id, product_id, usages)| LogicalDeviceDescriptor {
                logical_id: LogicalId(1),
                physical_id: PhysicalId(1),
                vendor_id,
                product_id,
                product_name: String::new(),
                collections: usages
                    .into_iter()
                    .map(|(usage_page, usage)| CollectionInfo {
                        usage,
                        usage_page,
                        input_reports: Vec::new(),
                        output_reports: Vec::new(),
                        feature_reports: Vec::new(),
                    })
                    .collect(),
            })
    }

    /// Reference rule: every present field must be satisfied
    fn reference_match(d: &LogicalDeviceDescriptor, f: &DeviceFilter) -> bool {
        fn field(wanted: Option<u16>, actual: u16) -> bool {
            match wanted {
                Some(wanted) => wanted == actual,
                None => true,
            }
        }

        let usage = (f.usage_page.is_none() && f.usage.is_none())
            || d.collections
                .iter()
                .any(|c| field(f.usage_page, c.usage_page) && field(f.usage, c.usage));
        field(f.vendor_id, d.vendor_id) && field(f.product_id, d.product_id) && usage
    }

    proptest! {
        /// Property: a filter set matches iff it is empty or some filter matches
        #[test]
        fn prop_filter_set_is_any(
            d in descriptor_strategy(),
            filters in proptest::collection::vec(filter_strategy(), 0..5),
        ) {
            let expected = filters.is_empty() || filters.iter().any(|f| reference_match(&d, f));
            prop_assert_eq!(matches_filter_set(&d, &filters), expected);
        }

        /// Property: filter order does not affect the result
        #[test]
        fn prop_filter_set_order_independent(
            d in descriptor_strategy(),
            filters in proptest::collection::vec(filter_strategy(), 0..5),
        ) {
            let mut reversed = filters.clone();
            reversed.reverse();
            prop_assert_eq!(matches_filter_set(&d, &filters), matches_filter_set(&d, &reversed));
        }

        /// Property: the empty filter matches every descriptor
        #[test]
        fn prop_empty_filter_matches(d in descriptor_strategy()) {
            prop_assert!(matches_filter(&d, &DeviceFilter::default()));
        }
    }
}
