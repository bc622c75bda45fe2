//! Directory service client and the periodic cache refresher.
//!
//! Two Basic-auth REST endpoints own the external/internal identifier
//! cross-reference:
//!
//! - `GET {base}/v1/devices?limit=10000`: `(state.state, webId,
//!   currentTransponder.transponderId)` per element; only `ACTIVE` devices
//!   are admitted, `DEACTIVATED` ones are skipped silently, anything
//!   incomplete is logged and skipped.
//! - `GET {base}/v1/accounts?limit=10000`: `(accountId, apiId)` per
//!   element; entries without an `apiId` are logged and skipped.
//!
//! Numeric IDs are canonicalized to decimal strings with no fractional part.

use crate::cache::{MappingSnapshot, SharedCache};
use crate::config::{DirectoryConfig, StalePolicy};
use fleet_protocol::canonical_id;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

const PAGE_LIMIT: &str = "10000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    #[serde(default)]
    state: Option<DeviceState>,
    web_id: Option<f64>,
    #[serde(default)]
    current_transponder: Option<CurrentTransponder>,
}

#[derive(Debug, Deserialize)]
struct DeviceState {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentTransponder {
    transponder_id: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    account_id: Option<f64>,
    api_id: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl DirectoryClient {
    pub fn new(cfg: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(DirectoryError::Http)?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        })
    }

    /// Fetch both listings and stage a snapshot.  Callers decide how the
    /// snapshot lands in the cache (retain vs clear).
    pub async fn fetch_mappings(&self) -> Result<MappingSnapshot, DirectoryError> {
        let devices: Vec<DeviceEntry> = self.get_listing("/v1/devices").await?;
        let accounts: Vec<AccountEntry> = self.get_listing("/v1/accounts").await?;
        Ok(snapshot_from(devices, accounts))
    }

    async fn get_listing<T>(&self, endpoint: &str) -> Result<Vec<T>, DirectoryError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[("limit", PAGE_LIMIT)])
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(DirectoryError::Http)?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DirectoryError::Status {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
            });
        }
        response.json::<Vec<T>>().await.map_err(DirectoryError::Http)
    }
}

/// Filter and canonicalize directory listings into a staged snapshot.
pub fn snapshot_from(devices: Vec<DeviceEntry>, accounts: Vec<AccountEntry>) -> MappingSnapshot {
    let mut snapshot = MappingSnapshot::default();

    for device in devices {
        let state = device.state.as_ref().and_then(|s| s.state.as_deref());
        if state == Some("DEACTIVATED") {
            continue; // archived, move on
        }
        let transponder_id = device
            .current_transponder
            .as_ref()
            .and_then(|t| t.transponder_id);
        match (state, device.web_id, transponder_id) {
            (Some("ACTIVE"), Some(web_id), Some(transponder_id)) => {
                snapshot
                    .devices
                    .insert(canonical_id(transponder_id), canonical_id(web_id));
            }
            _ => {
                warn!(
                    state = state.is_some(),
                    web_id = device.web_id.is_some(),
                    transponder_id = transponder_id.is_some(),
                    "incomplete device entry in directory listing"
                );
            }
        }
    }

    for account in accounts {
        match (account.account_id, account.api_id) {
            (Some(internal), Some(external)) => {
                snapshot
                    .accounts
                    .insert(canonical_id(external), canonical_id(internal));
            }
            (Some(internal), None) => {
                warn!(
                    account_id = %canonical_id(internal),
                    "directory account has no external API id"
                );
            }
            _ => {}
        }
    }

    snapshot
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

/// One refresh cycle.  The cache lock is held across both HTTP requests so
/// observers never see a half-applied rebuild; on failure the counter is
/// bumped and the maps are untouched.
pub async fn refresh(
    client: &DirectoryClient,
    cache: &SharedCache,
    policy: StalePolicy,
) -> Result<(), DirectoryError> {
    let mut cache = cache.lock().await;
    match client.fetch_mappings().await {
        Ok(snapshot) => {
            cache.apply(snapshot, policy);
            debug!(
                accounts = cache.account_count(),
                devices = cache.device_count(),
                "identifier mapping updated"
            );
            Ok(())
        }
        Err(e) => {
            cache.note_refresh_failure();
            Err(e)
        }
    }
}

/// Background refresher: a periodic tick plus a manual trigger channel used
/// by the supervisor for the immediate boot-time rebuild.
pub async fn run_refresher(
    client: DirectoryClient,
    cache: SharedCache,
    interval: Duration,
    policy: StalePolicy,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let reason = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("refresher stopping (shutdown)");
                    return;
                }
                continue;
            }
            Some(()) = trigger_rx.recv() => "requested",
            _ = ticker.tick() => "scheduled",
        };
        debug!(reason, "identifier map rebuild starting");
        if let Err(e) = refresh(&client, &cache, policy).await {
            warn!(error = %e, "identifier map rebuild failed; keeping previous mapping");
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("directory endpoint {endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn devices_fixture() -> Vec<DeviceEntry> {
        serde_json::from_value(serde_json::json!([
            {
                "state": {"state": "ACTIVE"},
                "webId": 7001,
                "currentTransponder": {"transponderId": 9000}
            },
            {
                "state": {"state": "DEACTIVATED"},
                "webId": 7002,
                "currentTransponder": {"transponderId": 9001}
            },
            {
                "state": {"state": "ACTIVE"},
                "webId": 7003
            },
            {
                "webId": 7004,
                "currentTransponder": {"transponderId": 9004}
            }
        ]))
        .unwrap()
    }

    fn accounts_fixture() -> Vec<AccountEntry> {
        serde_json::from_value(serde_json::json!([
            {"accountId": 501, "apiId": 100},
            {"accountId": 502},
            {"apiId": 103}
        ]))
        .unwrap()
    }

    #[test]
    fn only_active_complete_devices_are_admitted() {
        let snapshot = snapshot_from(devices_fixture(), vec![]);
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.devices.get("9000").map(String::as_str), Some("7001"));
    }

    #[test]
    fn accounts_require_both_ids() {
        let snapshot = snapshot_from(vec![], accounts_fixture());
        assert_eq!(snapshot.accounts.len(), 1);
        assert_eq!(snapshot.accounts.get("100").map(String::as_str), Some("501"));
    }

    #[test]
    fn ids_are_canonical_decimal_strings() {
        let devices: Vec<DeviceEntry> = serde_json::from_value(serde_json::json!([
            {
                "state": {"state": "ACTIVE"},
                "webId": 7001.0,
                "currentTransponder": {"transponderId": 519123.0}
            }
        ]))
        .unwrap();
        let snapshot = snapshot_from(devices, vec![]);
        assert!(snapshot.devices.contains_key("519123"));
    }
}
