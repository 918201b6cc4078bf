//! Request/response correlation
//!
//! The provider protocol has no request ids. A list request is answered by the
//! next list-complete marker, and a feature report read by the next reply frame
//! for the same device, so at most one of each may be outstanding: one list
//! correlation (shared by every caller that joins it) and one feature report
//! read per logical device.
//!
//! A correlation only exists while someone waits on it. List waiters whose
//! caller went away are pruned on the next registration, and a feature report
//! read removes its own entry when the [`FeatureRead`] is dropped.

use bytes::Bytes;
use protocol::LogicalId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::RecvError;

use super::lock;
use crate::error::HidError;

/// Key of a pending correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    List,
    FeatureReport(LogicalId),
}

/// Answer to a feature report read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureReply {
    pub report_id: u8,
    pub data: Bytes,
}

type Waiter<T> = oneshot::Sender<Result<T, HidError>>;

/// Receiving half handed to a caller awaiting a correlation
pub type Pending<T> = oneshot::Receiver<Result<T, HidError>>;

#[derive(Default)]
struct Table {
    list: Vec<Waiter<()>>,
    /// Waiter per device, tagged with the ticket of its registration
    feature_reports: HashMap<LogicalId, (u64, Waiter<FeatureReply>)>,
    next_ticket: u64,
}

/// A registered feature report read
///
/// Resolves like the underlying receiver. Dropping it before the reply
/// arrives frees the device's slot for the next read.
pub struct FeatureRead<'a> {
    correlator: &'a Correlator,
    logical_id: LogicalId,
    ticket: u64,
    receiver: Pending<FeatureReply>,
}

impl Future for FeatureRead<'_> {
    type Output = Result<Result<FeatureReply, HidError>, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx)
    }
}

impl Drop for FeatureRead<'_> {
    fn drop(&mut self) {
        self.correlator.release_feature_report(self.logical_id, self.ticket);
    }
}

/// Pending request table
#[derive(Default)]
pub struct Correlator {
    table: Mutex<Table>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the list correlation
    ///
    /// The boolean is true for the caller that opened it; only that caller
    /// sends the list command.
    pub fn register_list(&self) -> (Pending<()>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut table = lock(&self.table);
        table.list.retain(|waiter| !waiter.is_closed());
        let first = table.list.is_empty();
        table.list.push(tx);
        (rx, first)
    }

    /// Register a feature report read for a device
    pub fn register_feature_report(
        &self,
        logical_id: LogicalId,
    ) -> Result<FeatureRead<'_>, HidError> {
        let mut table = lock(&self.table);
        if table.feature_reports.contains_key(&logical_id) {
            return Err(HidError::RequestInProgress(logical_id));
        }
        let ticket = table.next_ticket;
        table.next_ticket += 1;
        let (tx, rx) = oneshot::channel();
        table.feature_reports.insert(logical_id, (ticket, tx));
        Ok(FeatureRead {
            correlator: self,
            logical_id,
            ticket,
            receiver: rx,
        })
    }

    /// Drop a read's entry unless it was already answered or replaced
    fn release_feature_report(&self, logical_id: LogicalId, ticket: u64) {
        let mut table = lock(&self.table);
        if table
            .feature_reports
            .get(&logical_id)
            .is_some_and(|(current, _)| *current == ticket)
        {
            table.feature_reports.remove(&logical_id);
        }
    }

    /// Resolve every list waiter; returns how many were waiting
    pub fn resolve_list(&self) -> usize {
        let waiters = std::mem::take(&mut lock(&self.table).list);
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        count
    }

    /// Resolve a feature report read; false if none was pending
    pub fn resolve_feature_report(&self, logical_id: LogicalId, reply: FeatureReply) -> bool {
        let waiter = lock(&self.table).feature_reports.remove(&logical_id);
        match waiter {
            Some((_, waiter)) => {
                let _ = waiter.send(Ok(reply));
                true
            }
            None => false,
        }
    }

    /// Fail and clear one correlation; returns how many waiters were woken
    pub fn fail(&self, key: CorrelationKey, error: HidError) -> usize {
        match key {
            CorrelationKey::List => {
                let waiters = std::mem::take(&mut lock(&self.table).list);
                let count = waiters.len();
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                count
            }
            CorrelationKey::FeatureReport(logical_id) => {
                let waiter = lock(&self.table).feature_reports.remove(&logical_id);
                match waiter {
                    Some((_, waiter)) => {
                        let _ = waiter.send(Err(error));
                        1
                    }
                    None => 0,
                }
            }
        }
    }

    /// Fail every pending correlation
    pub fn fail_all(&self, error: HidError) -> usize {
        let table = std::mem::take(&mut *lock(&self.table));
        let count = table.list.len() + table.feature_reports.len();
        for waiter in table.list {
            let _ = waiter.send(Err(error.clone()));
        }
        for (_, (_, waiter)) in table.feature_reports {
            let _ = waiter.send(Err(error.clone()));
        }
        count
    }

    pub fn is_pending(&self, key: CorrelationKey) -> bool {
        let table = lock(&self.table);
        match key {
            CorrelationKey::List => !table.list.is_empty(),
            CorrelationKey::FeatureReport(logical_id) => {
                table.feature_reports.contains_key(&logical_id)
            }
        }
    }
}
