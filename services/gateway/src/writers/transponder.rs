//! Transponder report writer: `REPORT_DATA` frames to
//! `account/{account}/vehicle/{device}/report_data` documents.

use super::{BuildError, MarshalError};
use crate::cache::SharedCache;
use crate::metrics::Metrics;
use crate::router::{recv_next, SharedReceiver, TransponderJob};
use crate::store::{DocumentPath, DocumentStore};
use fleet_protocol::{
    canonical_id, instant_from_epoch_ms, is_transponder_data_type, GeoTag, GeoTagMeta, LatLng,
    TransponderDocument,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

pub async fn run_transponder_writer(
    worker: usize,
    store: Arc<dyn DocumentStore>,
    cache: SharedCache,
    rx: SharedReceiver<TransponderJob>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(worker, "transponder writer stopping (shutdown)");
                    return;
                }
                continue;
            }
            job = recv_next(&rx) => match job {
                Some(j) => j,
                None => return,
            },
        };
        handle_job(job, store.as_ref(), &cache, &metrics).await;
    }
}

async fn handle_job(
    job: TransponderJob,
    store: &dyn DocumentStore,
    cache: &SharedCache,
    metrics: &Metrics,
) {
    debug!(data_type = %job.data_type, "transponder report received");

    let ids = match build(&job, cache).await {
        Ok(ids) => ids,
        Err(e @ BuildError::MissingIdentifiers) => {
            Metrics::incr(&metrics.reports_missing_identifiers);
            warn!(error = %e, "dropping transponder report");
            return;
        }
        Err(e) => {
            Metrics::incr(&metrics.reports_unmapped_identifiers);
            warn!(error = %e, "dropping transponder report");
            return;
        }
    };

    let document = match marshal(&job) {
        Ok(d) => d,
        Err(e) => {
            Metrics::incr(&metrics.incompatible_reports);
            warn!(error = %e, "cannot marshal transponder report");
            return;
        }
    };

    let path = DocumentPath::collection("account")
        .doc(ids.account)
        .sub("vehicle")
        .doc(ids.device)
        .sub("report_data");

    let value = match serde_json::to_value(&document) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "transponder document serialization failed");
            return;
        }
    };

    match store.create(&path, value).await {
        Ok(id) => {
            Metrics::incr(&metrics.documents_written);
            debug!(path = %path, document = %id, "transponder report written");
        }
        Err(e) => {
            Metrics::incr(&metrics.write_failures);
            error!(error = %e, path = %path, "store write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Build: identifier validation and resolution
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ResolvedIds {
    pub account: String,
    pub device: String,
}

pub(crate) async fn build(
    job: &TransponderJob,
    cache: &SharedCache,
) -> Result<ResolvedIds, BuildError> {
    let (Some(transponder_id), Some(account_id)) =
        (job.report.transponder_id, job.report.account_id)
    else {
        return Err(BuildError::MissingIdentifiers);
    };
    let external_device = canonical_id(transponder_id);
    let external_account = canonical_id(account_id);

    let cache = cache.lock().await;
    let account = cache
        .resolve_account(&external_account)
        .ok_or(BuildError::UnmappedAccount(external_account))?;
    let device = cache
        .resolve_device(&external_device)
        .ok_or(BuildError::UnmappedDevice(external_device))?;
    Ok(ResolvedIds { account, device })
}

// ---------------------------------------------------------------------------
// Marshal: wire payload to at-rest document
// ---------------------------------------------------------------------------

pub(crate) fn marshal(job: &TransponderJob) -> Result<TransponderDocument, MarshalError> {
    if !is_transponder_data_type(&job.data_type) {
        return Err(MarshalError::NotCompatible {
            data_type: job.data_type.clone(),
        });
    }

    let mut document = TransponderDocument {
        report_type: job.data_type.clone(),
        ..Default::default()
    };

    let Some(data) = &job.report.data else {
        return Ok(document);
    };

    document.report_timestamp = data.report_timestamp.map(instant_from_epoch_ms);
    document.config_id = data.config_id;
    document.duration = data.duration;
    document.event_start = data.event_start.map(instant_from_epoch_ms);
    document.in_progress = data.in_progress;
    document.serial = data.serial;

    if let Some(location) = &data.location {
        document.location_accuracy = location.accuracy;
        document.heading = location.heading;
        document.lat_lng = match (location.latitude, location.longitude) {
            (Some(latitude), Some(longitude)) => Some(LatLng {
                latitude,
                longitude,
            }),
            _ => None,
        };
        if let Some(tags) = &location.geo_tags {
            document.geo_tags = flatten_geo_tags(tags).unwrap_or_default();
        }
    }

    if let Some(parameters) = &data.parameters {
        document.battery_voltage = parameters.battery_voltage;
        document.cell_signal_strength = parameters.cell_signal_strength;
        document.is_low_battery = parameters.is_low_battery;
        document.odometer = parameters.odometer;
        document.speed = parameters.speed;
        document.speed_limit = parameters.speed_limit;
    }

    Ok(document)
}

/// Flatten the nested tag-source -> tag-name -> metadata map.  Any entry
/// missing its zone ID or timestamp invalidates the whole set; the document
/// then carries no tags at all rather than a partial list.
fn flatten_geo_tags(
    tags: &BTreeMap<String, BTreeMap<String, GeoTagMeta>>,
) -> Option<Vec<GeoTag>> {
    let mut flattened = Vec::new();
    for (scope, entries) in tags {
        for (tag_name, meta) in entries {
            let zone_id = meta.geo_tag_id?;
            let timestamp = meta.timestamp?;
            flattened.push(GeoTag {
                zone_id,
                tag_name: tag_name.clone(),
                scope: scope.clone(),
                zone_modified_timestamp: Some(instant_from_epoch_ms(timestamp)),
            });
        }
    }
    Some(flattened)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
