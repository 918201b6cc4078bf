//! Device authorization
//!
//! Access is granted per physical device and remembered per origin. The
//! [`AuthorizationStore`] trait is the persistence seam; [`Authorization`]
//! keeps the working set in memory and writes it back on every change.

use protocol::PhysicalId;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{HidError, Result};
use crate::network::lock;

/// Failure reading or writing persisted authorizations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid authorization file: {0}")]
    Format(#[from] serde_json::Error),
}

impl From<StoreError> for HidError {
    fn from(err: StoreError) -> Self {
        HidError::Storage(err.to_string())
    }
}

/// Persistence for the set of authorized physical devices
pub trait AuthorizationStore: Send + Sync {
    fn load(&self) -> std::result::Result<BTreeSet<PhysicalId>, StoreError>;
    fn save(&self, granted: &BTreeSet<PhysicalId>) -> std::result::Result<(), StoreError>;
}

/// Store that forgets everything when dropped
#[derive(Debug, Default)]
pub struct MemoryAuthorizationStore {
    granted: Mutex<BTreeSet<PhysicalId>>,
}

impl MemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_granted(granted: impl IntoIterator<Item = PhysicalId>) -> Self {
        Self {
            granted: Mutex::new(granted.into_iter().collect()),
        }
    }

    /// What was last saved
    pub fn snapshot(&self) -> BTreeSet<PhysicalId> {
        lock(&self.granted).clone()
    }
}

impl AuthorizationStore for MemoryAuthorizationStore {
    fn load(&self) -> std::result::Result<BTreeSet<PhysicalId>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, granted: &BTreeSet<PhysicalId>) -> std::result::Result<(), StoreError> {
        *lock(&self.granted) = granted.clone();
        Ok(())
    }
}

/// JSON file shared by every origin, one entry per origin
///
/// ```json
/// { "https://example.com": [100, 200] }
/// ```
#[derive(Debug, Clone)]
pub struct FileAuthorizationStore {
    path: PathBuf,
    origin: String,
}

impl FileAuthorizationStore {
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> std::result::Result<BTreeMap<String, BTreeSet<PhysicalId>>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl AuthorizationStore for FileAuthorizationStore {
    fn load(&self) -> std::result::Result<BTreeSet<PhysicalId>, StoreError> {
        let mut all = self.read_all()?;
        Ok(all.remove(&self.origin).unwrap_or_default())
    }

    fn save(&self, granted: &BTreeSet<PhysicalId>) -> std::result::Result<(), StoreError> {
        let mut all = self.read_all()?;
        if granted.is_empty() {
            all.remove(&self.origin);
        } else {
            all.insert(self.origin.clone(), granted.clone());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        debug!("Saved authorizations to {:?}", self.path);
        Ok(())
    }
}

/// Working set of authorized physical devices
pub struct Authorization {
    store: Box<dyn AuthorizationStore>,
    granted: Mutex<BTreeSet<PhysicalId>>,
}

impl Authorization {
    /// Load the persisted set
    pub fn load(store: Box<dyn AuthorizationStore>) -> Result<Self> {
        let granted = store.load()?;
        debug!("Loaded {} authorized device(s)", granted.len());
        Ok(Self {
            store,
            granted: Mutex::new(granted),
        })
    }

    pub fn is_granted(&self, physical_id: PhysicalId) -> bool {
        lock(&self.granted).contains(&physical_id)
    }

    pub fn granted(&self) -> BTreeSet<PhysicalId> {
        lock(&self.granted).clone()
    }

    /// Add a device; returns false if it was already granted
    pub fn grant(&self, physical_id: PhysicalId) -> Result<bool> {
        let changed = self.update(|granted| granted.insert(physical_id))?;
        if changed {
            info!("Granted access to physical device {}", physical_id);
        }
        Ok(changed)
    }

    /// Remove a device; returns false if it was not granted
    pub fn revoke(&self, physical_id: PhysicalId) -> Result<bool> {
        let changed = self.update(|granted| granted.remove(&physical_id))?;
        if changed {
            info!("Revoked access to physical device {}", physical_id);
        }
        Ok(changed)
    }

    /// Apply a change and persist it; the change is undone if saving fails
    fn update(&self, change: impl FnOnce(&mut BTreeSet<PhysicalId>) -> bool) -> Result<bool> {
        let mut granted = lock(&self.granted);
        let mut next = granted.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.store.save(&next)?;
        *granted = next;
        Ok(true)
    }
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization")
            .field("granted", &*lock(&self.granted))
            .finish_non_exhaustive()
    }
}
