//! ELD report writer: `ELD_RECORD` frames to
//! `account/{account}/driver/{userId}/report_data` documents.
//!
//! Only navigation records are persisted for now; other ELD data types drop
//! before the build step so they never produce validation noise.

use super::{BuildError, MarshalError};
use crate::cache::SharedCache;
use crate::metrics::Metrics;
use crate::router::{recv_next, EldJob, SharedReceiver};
use crate::store::{DocumentPath, DocumentStore};
use fleet_protocol::{canonical_id, instant_from_epoch_ms, EldDocument, LatLng};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

const NAVIGATION_DATA_TYPE: &str = "navigation";

pub async fn run_eld_writer(
    worker: usize,
    store: Arc<dyn DocumentStore>,
    cache: SharedCache,
    rx: SharedReceiver<EldJob>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(worker, "eld writer stopping (shutdown)");
                    return;
                }
                continue;
            }
            job = recv_next(&rx) => match job {
                Some(j) => j,
                None => return,
            },
        };

        if job.data_type != NAVIGATION_DATA_TYPE {
            debug!(data_type = %job.data_type, "skipping non-navigation eld record");
            continue;
        }
        handle_job(job, store.as_ref(), &cache, &metrics).await;
    }
}

async fn handle_job(job: EldJob, store: &dyn DocumentStore, cache: &SharedCache, metrics: &Metrics) {
    debug!(data_type = %job.data_type, "eld report received");

    let ids = match build(&job, cache).await {
        Ok(ids) => ids,
        Err(e @ BuildError::MissingIdentifiers) => {
            Metrics::incr(&metrics.reports_missing_identifiers);
            warn!(error = %e, "dropping eld report");
            return;
        }
        Err(e) => {
            Metrics::incr(&metrics.reports_unmapped_identifiers);
            warn!(error = %e, "dropping eld report");
            return;
        }
    };

    let document = match marshal(&job) {
        Ok(d) => d,
        Err(e) => {
            Metrics::incr(&metrics.incompatible_reports);
            warn!(error = %e, "cannot marshal eld report");
            return;
        }
    };

    let path = DocumentPath::collection("account")
        .doc(ids.account)
        .sub("driver")
        .doc(ids.user)
        .sub("report_data");

    let value = match serde_json::to_value(&document) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "eld document serialization failed");
            return;
        }
    };

    match store.create(&path, value).await {
        Ok(id) => {
            Metrics::incr(&metrics.documents_written);
            debug!(path = %path, document = %id, "eld report written");
        }
        Err(e) => {
            Metrics::incr(&metrics.write_failures);
            error!(error = %e, path = %path, "store write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct EldIds {
    pub account: String,
    /// Used verbatim in the path; driver IDs are not cross-referenced.
    pub user: String,
}

pub(crate) async fn build(job: &EldJob, cache: &SharedCache) -> Result<EldIds, BuildError> {
    let user_id = job.report.data.as_ref().and_then(|d| d.user_id);
    let (Some(account_id), Some(user_id)) = (job.report.account_id, user_id) else {
        return Err(BuildError::MissingIdentifiers);
    };
    let external_account = canonical_id(account_id);

    let cache = cache.lock().await;
    let account = cache
        .resolve_account(&external_account)
        .ok_or(BuildError::UnmappedAccount(external_account))?;
    Ok(EldIds {
        account,
        user: canonical_id(user_id),
    })
}

// ---------------------------------------------------------------------------
// Marshal
// ---------------------------------------------------------------------------

pub(crate) fn marshal(job: &EldJob) -> Result<EldDocument, MarshalError> {
    if job.data_type != NAVIGATION_DATA_TYPE {
        return Err(MarshalError::NotCompatible {
            data_type: job.data_type.clone(),
        });
    }

    let report = &job.report;
    let mut document = EldDocument {
        report_type: job.data_type.clone(),
        ..Default::default()
    };

    document.us_dot_number = report.us_dot_number.clone();
    document.user_id = report.user_id;
    document.user_name = report.user_name.clone();
    document.event_id = report.event_id.clone();
    document.record_id = report.record_id.clone();
    document.record_timestamp = report.record_timestamp.map(instant_from_epoch_ms);
    document.record_status = report.record_status.clone();
    document.record_origin = report.record_origin.clone();
    document.is_diagnostic_active = report.is_diagnostic_active;
    document.is_malfunction_active = report.is_malfunction_active;

    if let Some(sent_from) = &report.sent_from {
        document.transponder_id = sent_from.transponder_id;
        document.terminal_number = sent_from.terminal_number.clone();
        document.server_rx_timestamp = sent_from.server_rx_timestamp.map(instant_from_epoch_ms);
    }

    if let Some(record) = &report.record_data {
        document.event_start_timestamp = record.event_start_timestamp.map(instant_from_epoch_ms);
        document.event_end_timestamp = record.event_end_timestamp.map(instant_from_epoch_ms);
        document.navigation_event = record.navigation_event.clone();
        document.vehicle_mode = record.vehicle_mode.clone();
        document.location_type = record.location_type.clone();
        document.meters = record.meters;
        if let Some(location) = &record.location {
            document.location = match (location.latitude, location.longitude) {
                (Some(latitude), Some(longitude)) => Some(LatLng {
                    latitude,
                    longitude,
                }),
                _ => None,
            };
            document.geo_description = location.geo_description.clone();
        }
    }

    Ok(document)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdentifierCache;
    use fleet_protocol::EldReport;

    fn job(data_type: &str, payload: serde_json::Value) -> EldJob {
        EldJob {
            data_type: data_type.to_owned(),
            report: serde_json::from_value::<EldReport>(payload).unwrap(),
        }
    }

    fn seeded_cache() -> SharedCache {
        let mut cache = IdentifierCache::new();
        cache.insert_account("200", "A2");
        std::sync::Arc::new(tokio::sync::Mutex::new(cache))
    }

    #[tokio::test]
    async fn build_resolves_account_and_keeps_user_verbatim() {
        let cache = seeded_cache();
        let job = job(
            "navigation",
            serde_json::json!({"accountId": 200, "data": {"userId": 55}}),
        );
        let ids = build(&job, &cache).await.unwrap();
        assert_eq!(
            ids,
            EldIds {
                account: "A2".to_owned(),
                user: "55".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn build_requires_driver_identity() {
        let cache = seeded_cache();
        let job = job("navigation", serde_json::json!({"accountId": 200}));
        assert_eq!(
            build(&job, &cache).await,
            Err(BuildError::MissingIdentifiers)
        );
    }

    #[tokio::test]
    async fn build_rejects_unmapped_account() {
        let cache = seeded_cache();
        let job = job(
            "navigation",
            serde_json::json!({"accountId": 999, "data": {"userId": 55}}),
        );
        assert_eq!(
            build(&job, &cache).await,
            Err(BuildError::UnmappedAccount("999".to_owned()))
        );
    }

    #[test]
    fn marshal_copies_nested_record_data() {
        let job = job(
            "navigation",
            serde_json::json!({
                "accountId": 200,
                "userId": 55,
                "recordId": "r-1",
                "sentFrom": {"transponderId": 519123, "terminalNumber": "T-9"},
                "recordData": {
                    "navigationEvent": "MOVING",
                    "meters": 1609.3,
                    "location": {"latitude": 42.36, "longitude": -71.05, "geoDescription": "Boston, MA"}
                },
                "data": {"userId": 55}
            }),
        );
        let document = marshal(&job).unwrap();
        assert_eq!(document.report_type, "navigation");
        assert_eq!(document.user_id, Some(55.0));
        assert_eq!(document.record_id.as_deref(), Some("r-1"));
        assert_eq!(document.terminal_number.as_deref(), Some("T-9"));
        assert_eq!(document.navigation_event.as_deref(), Some("MOVING"));
        assert_eq!(document.geo_description.as_deref(), Some("Boston, MA"));
        assert_eq!(
            document.location,
            Some(LatLng {
                latitude: 42.36,
                longitude: -71.05
            })
        );
    }

    #[test]
    fn marshal_rejects_non_navigation() {
        let job = job("duty_status", serde_json::json!({"accountId": 200}));
        assert!(matches!(
            marshal(&job),
            Err(MarshalError::NotCompatible { .. })
        ));
    }
}
