// fleet-protocol: Telematics stream wire types and at-rest document shapes.
//
// Inbound frames are free-form JSON; only `type` and `dataType` are
// guaranteed once a frame has passed the routing gate.  The typed payload
// structs below model every field the gateway extracts, all nullable, so a
// partially populated report parses cleanly and absent fields simply never
// reach the output document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The common head of every report frame.
///
/// All fields are optional on the wire: a frame missing `type` or `dataType`
/// is unroutable and gets dropped upstream, and keep-alive frames carry none
/// of them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeHead {
    #[serde(rename = "type")]
    pub report_type: Option<String>,
    pub data_type: Option<String>,
    /// Server-advertised resume cursor.  Opaque to the gateway; retained so
    /// reconnects can ask the server to replay from the last seen point.
    pub checkpoint: Option<f64>,
}

/// A routable report: head extraction succeeded, payload not yet typed.
///
/// The payload keeps the full frame so the per-kind parser sees the
/// top-level fields (`transponderId`, `accountId`, ...) as well as the
/// `data` subtree.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub report_type: String,
    pub data_type: String,
    pub payload: serde_json::Value,
}

/// Coarse report kinds the router understands.
pub const REPORT_DATA_TYPE: &str = "REPORT_DATA";
pub const ELD_RECORD_TYPE: &str = "ELD_RECORD";
pub const VIDEO_EVENT_TYPE: &str = "VIDEO_EVENT";

/// The transponder `dataType` vocabulary the store accepts.
pub fn is_transponder_data_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "status"
            | "parking"
            | "stopped"
            | "trip_report"
            | "hard_accel"
            | "hard_braking"
            | "hard_cornering"
            | "overspeeding"
            | "idling"
    )
}

// ---------------------------------------------------------------------------
// Transponder payload
// ---------------------------------------------------------------------------

/// A `REPORT_DATA` frame as emitted by a vehicle transponder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransponderReport {
    /// Vendor-side device ID; required for identifier resolution.
    pub transponder_id: Option<f64>,
    /// Vendor-side account ID; required for identifier resolution.
    pub account_id: Option<f64>,
    #[serde(default)]
    pub data: Option<TransponderData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransponderData {
    /// UTC epoch milliseconds.
    pub report_timestamp: Option<f64>,
    pub config_id: Option<f64>,
    pub duration: Option<f64>,
    /// UTC epoch milliseconds.
    pub event_start: Option<f64>,
    pub in_progress: Option<bool>,
    pub serial: Option<f64>,
    #[serde(default)]
    pub location: Option<TransponderLocation>,
    #[serde(default)]
    pub parameters: Option<TransponderParameters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransponderLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    /// tag-source -> tag-name -> metadata.  A BTreeMap keeps flattening
    /// order deterministic across runs.
    #[serde(default)]
    pub geo_tags: Option<BTreeMap<String, BTreeMap<String, GeoTagMeta>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoTagMeta {
    pub geo_tag_id: Option<f64>,
    /// UTC epoch milliseconds of the last zone boundary change.
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransponderParameters {
    pub battery_voltage: Option<f64>,
    pub cell_signal_strength: Option<f64>,
    pub is_low_battery: Option<bool>,
    pub odometer: Option<f64>,
    pub speed: Option<f64>,
    pub speed_limit: Option<f64>,
}

// ---------------------------------------------------------------------------
// ELD payload
// ---------------------------------------------------------------------------

/// An `ELD_RECORD` frame from an electronic-logging-device installation.
///
/// The document `userId` comes from the top-level wire `userId`; the
/// required driver identity for the storage path lives at `data.userId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EldReport {
    pub account_id: Option<f64>,
    pub user_id: Option<f64>,
    pub us_dot_number: Option<String>,
    pub user_name: Option<String>,
    #[serde(default)]
    pub sent_from: Option<EldSentFrom>,
    pub event_id: Option<String>,
    pub record_id: Option<String>,
    /// UTC epoch milliseconds.
    pub record_timestamp: Option<f64>,
    pub record_status: Option<String>,
    pub record_origin: Option<String>,
    #[serde(default)]
    pub record_data: Option<EldRecordData>,
    pub is_diagnostic_active: Option<bool>,
    pub is_malfunction_active: Option<bool>,
    #[serde(default)]
    pub data: Option<EldData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EldData {
    pub user_id: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EldSentFrom {
    pub transponder_id: Option<f64>,
    pub terminal_number: Option<String>,
    /// UTC epoch milliseconds.
    pub server_rx_timestamp: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EldRecordData {
    /// UTC epoch milliseconds.
    pub event_start_timestamp: Option<f64>,
    /// UTC epoch milliseconds.
    pub event_end_timestamp: Option<f64>,
    pub navigation_event: Option<String>,
    pub vehicle_mode: Option<String>,
    pub location_type: Option<String>,
    #[serde(default)]
    pub location: Option<EldLocation>,
    pub meters: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EldLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geo_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Video payload
// ---------------------------------------------------------------------------

/// A `VIDEO_EVENT` frame.  Routed but not persisted; the writer is a
/// log-and-discard sink until footage assembly lands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoReport {
    pub video_event_id: Option<String>,
    pub account_id: Option<f64>,
}

// ---------------------------------------------------------------------------
// At-rest documents
// ---------------------------------------------------------------------------

/// A latitude/longitude pair as stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// One flattened geo tag: the wire nests tag-source -> tag-name -> metadata,
/// the store keeps a flat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoTag {
    pub zone_id: f64,
    pub tag_name: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_modified_timestamp: Option<DateTime<Utc>>,
}

/// Transponder report document.  Absent inputs stay absent at rest so the
/// store preserves its own defaults; `type` is always present and equals the
/// wire `dataType`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransponderDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_id: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat_lng: Option<LatLng>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_signal_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_low_battery: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odometer: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geo_tags: Vec<GeoTag>,
    #[serde(rename = "type")]
    pub report_type: String,
}

/// ELD report document.  Same omit-empty semantics as the transponder
/// document; the store assigns `fsCreateTimestamp` on creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EldDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub us_dot_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transponder_id: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_rx_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_start_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_end_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_diagnostic_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_malfunction_active: Option<bool>,
    #[serde(rename = "type")]
    pub report_type: String,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Convert a wire timestamp (UTC epoch milliseconds as a float) to a UTC
/// instant.  Milliseconds scale to nanoseconds; the fractional part of the
/// float truncates, so `instant_from_epoch_ms(ms).timestamp_millis()` equals
/// `floor(ms)` for any in-range input.
pub fn instant_from_epoch_ms(ms: f64) -> DateTime<Utc> {
    let nanos = (ms as i64) * 1_000_000;
    DateTime::from_timestamp_nanos(nanos)
}

/// Canonical decimal rendering of a wire-side numeric ID: no fractional
/// part, no exponent.  Matches the directory's string keys.
pub fn canonical_id(value: f64) -> String {
    format!("{:.0}", value)
}
