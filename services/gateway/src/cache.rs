//! Identifier cache: external (vendor) IDs to internal IDs.
//!
//! One mutex guards both maps and the refresh counters.  The refresher holds
//! the lock for the entire refresh (directory requests included), so readers
//! only ever observe the pre-refresh or post-refresh snapshot.

use crate::config::StalePolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The cache as shared between the refresher and the writer pools.
pub type SharedCache = Arc<Mutex<IdentifierCache>>;

/// A fully fetched pair of mappings, staged before being applied.
#[derive(Debug, Clone, Default)]
pub struct MappingSnapshot {
    /// external account ID -> internal account ID
    pub accounts: HashMap<String, String>,
    /// external device (transponder) ID -> internal device ID
    pub devices: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct IdentifierCache {
    accounts: HashMap<String, String>,
    devices: HashMap<String, String>,
    pub successful_refreshes: u64,
    pub failed_refreshes: u64,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn resolve_account(&self, external: &str) -> Option<String> {
        self.accounts.get(external).cloned()
    }

    pub fn resolve_device(&self, external: &str) -> Option<String> {
        self.devices.get(external).cloned()
    }

    /// Both maps carry at least one entry.  The supervisor refuses to open
    /// the stream before this holds.
    pub fn is_populated(&self) -> bool {
        !self.accounts.is_empty() && !self.devices.is_empty()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Apply a successful refresh under the caller-held lock.
    pub fn apply(&mut self, snapshot: MappingSnapshot, policy: StalePolicy) {
        match policy {
            StalePolicy::Retain => {
                self.accounts.extend(snapshot.accounts);
                self.devices.extend(snapshot.devices);
            }
            StalePolicy::Clear => {
                self.accounts = snapshot.accounts;
                self.devices = snapshot.devices;
            }
        }
        self.successful_refreshes += 1;
    }

    /// Record a failed refresh; the existing maps stay intact.
    pub fn note_refresh_failure(&mut self) {
        self.failed_refreshes += 1;
    }

    /// Seed a single account mapping (boot-strapping tests).
    pub fn insert_account(&mut self, external: impl Into<String>, internal: impl Into<String>) {
        self.accounts.insert(external.into(), internal.into());
    }

    /// Seed a single device mapping (boot-strapping tests).
    pub fn insert_device(&mut self, external: impl Into<String>, internal: impl Into<String>) {
        self.devices.insert(external.into(), internal.into());
    }
}
