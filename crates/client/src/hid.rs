//! Device access facade
//!
//! [`Hid`] is what applications talk to: it lists the devices the current
//! origin may use, runs authorization requests (including the selection
//! prompt) and reports device arrivals and removals for authorized devices.

use anyhow::Context;
use protocol::PhysicalId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::authorization::{Authorization, FileAuthorizationStore};
use crate::config::ClientConfig;
use crate::error::{HidError, Result};
use crate::network::{
    ConnectionEvent, ConnectionManager, ConnectionState, DeviceFilter, DeviceSession, ObserverId,
    ObserverList, WebSocketConnector, group_by_physical_id,
};
use crate::prompt::{DevicePrompt, PromptCandidate, PromptOutcome};

type Groups = Vec<(PhysicalId, Vec<Arc<DeviceSession>>)>;

/// Device access for one origin
pub struct Hid {
    manager: ConnectionManager,
    prompt: Arc<dyn DevicePrompt>,
    prompt_poll_interval: Duration,
    connection_observers: Arc<ObserverList<ConnectionEvent>>,
    forwarder: ObserverId,
}

impl Hid {
    pub fn new(
        manager: ConnectionManager,
        prompt: Arc<dyn DevicePrompt>,
        prompt_poll_interval: Duration,
    ) -> Self {
        let connection_observers = Arc::new(ObserverList::new());

        let observers = connection_observers.clone();
        let authorization = manager.authorization().clone();
        let forwarder = manager.add_connection_observer(move |event: &ConnectionEvent| {
            if authorization.is_granted(event.device().physical_id()) {
                observers.notify(event);
            }
        });

        Self {
            manager,
            prompt,
            prompt_poll_interval,
            connection_observers,
            forwarder,
        }
    }

    /// Wire up the WebSocket connector and file store described by `config`
    pub fn from_config(config: &ClientConfig, prompt: Arc<dyn DevicePrompt>) -> anyhow::Result<Self> {
        let store = FileAuthorizationStore::new(config.store_path(), config.client.origin.clone());
        let store_path = store.path().to_path_buf();
        let authorization = Authorization::load(Box::new(store)).with_context(|| {
            format!("Failed to load authorizations from {}", store_path.display())
        })?;

        let connector = WebSocketConnector::new(config.provider.url.clone())
            .with_origin(config.client.origin.clone())
            .with_report_ids(config.provider.report_ids)
            .with_connect_timeout(config.connect_timeout());
        info!("Using HID provider at {}", connector.endpoint());

        let manager = ConnectionManager::new(
            Arc::new(connector),
            Arc::new(authorization),
            config.request_timeout(),
        );
        Ok(Self::new(manager, prompt, config.prompt_poll_interval()))
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Authorized devices of the current listing
    ///
    /// The list is refreshed unless a session is open.
    pub async fn get_devices(&self) -> Result<Vec<Arc<DeviceSession>>> {
        let listed = self.manager.refresh_if_idle().await?;
        let authorization = self.manager.authorization();
        Ok(listed
            .into_iter()
            .filter(|device| authorization.is_granted(device.physical_id()))
            .collect())
    }

    /// Ask for access to a device matching `filters`
    ///
    /// Always refreshes the list first, open sessions or not. No match yields
    /// an empty list. A single matching physical device is granted directly;
    /// several go through the prompt. The returned sessions are the matching
    /// interfaces of the granted device.
    pub async fn request_device(&self, filters: &[DeviceFilter]) -> Result<Vec<Arc<DeviceSession>>> {
        let listed = self.manager.refresh_device_list().await?;
        let mut groups = candidate_groups(&listed, filters);

        match groups.len() {
            0 => {
                debug!("No device matches {:?}", filters);
                Ok(Vec::new())
            }
            1 => {
                let (physical_id, sessions) = groups.remove(0);
                self.manager.authorization().grant(physical_id)?;
                Ok(sessions)
            }
            n => {
                debug!("{} physical devices match, prompting", n);
                self.prompt_for(filters, groups).await
            }
        }
    }

    async fn prompt_for(&self, filters: &[DeviceFilter], groups: Groups) -> Result<Vec<Arc<DeviceSession>>> {
        let mut latest = groups;
        let (candidates_tx, candidates_rx) = watch::channel(candidates(&latest));
        let mut presented = self.prompt.present(candidates_rx);

        let mut poll = tokio::time::interval(self.prompt_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial snapshot is already out
        poll.tick().await;

        let outcome = loop {
            tokio::select! {
                outcome = &mut presented => break outcome,
                _ = poll.tick() => {
                    match self.manager.refresh_if_idle().await {
                        Ok(listed) => {
                            latest = candidate_groups(&listed, filters);
                            candidates_tx.send_replace(candidates(&latest));
                        }
                        Err(e) => debug!("Refresh while prompting failed: {}", e),
                    }
                }
            }
        };

        match outcome {
            PromptOutcome::Cancelled => Err(HidError::UserCancelled),
            PromptOutcome::Selected(selected) => {
                let Some((physical_id, sessions)) =
                    latest.into_iter().find(|(physical_id, _)| *physical_id == selected)
                else {
                    return Err(HidError::InvalidSelection(selected));
                };
                self.manager.authorization().grant(physical_id)?;
                Ok(sessions)
            }
        }
    }

    /// Observe arrivals and removals of authorized devices
    pub fn add_connection_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.connection_observers.add(observer)
    }

    pub fn remove_connection_observer(&self, id: ObserverId) -> bool {
        self.connection_observers.remove(id)
    }

    /// Single callback slot, invoked after the registered observers
    pub fn set_connection_handler<F>(&self, handler: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.connection_observers.set_handler(handler);
    }

    pub fn clear_connection_handler(&self) {
        self.connection_observers.clear_handler();
    }

    /// Refresh the listing periodically so arrivals surface on their own
    ///
    /// Refreshes are skipped while a session is open. Abort the returned
    /// handle to stop watching.
    pub fn spawn_device_watcher(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.refresh_if_idle().await {
                    debug!("Background refresh failed: {}", e);
                }
            }
        })
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn active_sessions(&self) -> usize {
        self.manager.active_sessions()
    }
}

impl Drop for Hid {
    fn drop(&mut self) {
        self.manager.remove_connection_observer(self.forwarder);
    }
}

fn candidate_groups(listed: &[Arc<DeviceSession>], filters: &[DeviceFilter]) -> Groups {
    let matching: Vec<Arc<DeviceSession>> = listed
        .iter()
        .filter(|device| device.matches(filters))
        .cloned()
        .collect();
    group_by_physical_id(&matching)
}

fn candidates(groups: &[(PhysicalId, Vec<Arc<DeviceSession>>)]) -> Vec<PromptCandidate> {
    groups
        .iter()
        .map(|(physical_id, sessions)| PromptCandidate::from_group(*physical_id, sessions))
        .collect()
}
