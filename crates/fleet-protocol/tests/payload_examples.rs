/// Payload parsing tests against representative wire frames.
///
/// The fixtures mirror real feed traffic: a full status report, a sparse
/// event report, and an ELD navigation record with the nested subtrees.
use fleet_protocol::{EldReport, EnvelopeHead, TransponderReport};

const STATUS_FRAME: &str = r#"{
  "type": "REPORT_DATA",
  "dataType": "status",
  "transponderId": 519123,
  "accountId": 100,
  "checkpoint": 41,
  "data": {
    "reportTimestamp": 1700000000000,
    "configId": 3,
    "serial": 88001,
    "location": {
      "latitude": 42.36,
      "longitude": -71.05,
      "accuracy": 8.5,
      "heading": 270,
      "geoTags": {
        "account": {
          "yard": { "geoTagId": 12, "timestamp": 1690000000000 }
        },
        "global": {
          "state_ma": { "geoTagId": 7, "timestamp": 1680000000000 }
        }
      }
    },
    "parameters": {
      "batteryVoltage": 12.6,
      "cellSignalStrength": -71,
      "isLowBattery": false,
      "odometer": 123456.7,
      "speed": 42,
      "speedLimit": 55
    }
  }
}"#;

const NAVIGATION_FRAME: &str = r#"{
  "type": "ELD_RECORD",
  "dataType": "navigation",
  "accountId": 200,
  "userId": 55,
  "usDotNumber": "1234567",
  "userName": "jdoe",
  "sentFrom": {
    "transponderId": 519123,
    "terminalNumber": "T-9",
    "serverRxTimestamp": 1700000005000
  },
  "eventId": "e-1",
  "recordId": "r-1",
  "recordTimestamp": 1700000004000,
  "recordStatus": "ACTIVE",
  "recordOrigin": "AUTO",
  "recordData": {
    "eventStartTimestamp": 1700000000000,
    "eventEndTimestamp": 1700000003000,
    "navigationEvent": "MOVING",
    "vehicleMode": "DRIVING",
    "locationType": "GPS",
    "location": {
      "latitude": 42.36,
      "longitude": -71.05,
      "geoDescription": "Boston, MA"
    },
    "meters": 1609.3
  },
  "isDiagnosticActive": false,
  "isMalfunctionActive": false,
  "data": { "userId": 55 },
  "checkpoint": 42
}"#;

#[test]
fn status_frame_parses_head_and_payload() {
    let head: EnvelopeHead = serde_json::from_str(STATUS_FRAME).unwrap();
    assert_eq!(head.report_type.as_deref(), Some("REPORT_DATA"));
    assert_eq!(head.data_type.as_deref(), Some("status"));
    assert_eq!(head.checkpoint, Some(41.0));

    let report: TransponderReport = serde_json::from_str(STATUS_FRAME).unwrap();
    assert_eq!(report.transponder_id, Some(519123.0));
    assert_eq!(report.account_id, Some(100.0));

    let data = report.data.unwrap();
    assert_eq!(data.report_timestamp, Some(1_700_000_000_000.0));
    let params = data.parameters.unwrap();
    assert_eq!(params.speed, Some(42.0));
    assert_eq!(params.is_low_battery, Some(false));

    let location = data.location.unwrap();
    assert_eq!(location.heading, Some(270.0));
    let tags = location.geo_tags.unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags["account"]["yard"].geo_tag_id, Some(12.0));
}

#[test]
fn sparse_event_frame_parses_with_absent_subtrees() {
    let frame = r#"{"type":"REPORT_DATA","dataType":"hard_braking","transponderId":9000,"accountId":100,"checkpoint":5}"#;
    let report: TransponderReport = serde_json::from_str(frame).unwrap();
    assert_eq!(report.transponder_id, Some(9000.0));
    assert!(report.data.is_none());
}

#[test]
fn navigation_frame_parses_nested_record_data() {
    let report: EldReport = serde_json::from_str(NAVIGATION_FRAME).unwrap();
    assert_eq!(report.account_id, Some(200.0));
    assert_eq!(report.data.as_ref().unwrap().user_id, Some(55.0));
    assert_eq!(report.record_id.as_deref(), Some("r-1"));

    let record = report.record_data.unwrap();
    assert_eq!(record.navigation_event.as_deref(), Some("MOVING"));
    assert_eq!(record.meters, Some(1609.3));
    let location = record.location.unwrap();
    assert_eq!(location.geo_description.as_deref(), Some("Boston, MA"));

    let sent_from = report.sent_from.unwrap();
    assert_eq!(sent_from.terminal_number.as_deref(), Some("T-9"));
}

#[test]
fn eld_frame_missing_driver_identity_still_parses() {
    // The writer is responsible for rejecting it; parsing must not fail.
    let frame = r#"{"type":"ELD_RECORD","dataType":"navigation","accountId":200}"#;
    let report: EldReport = serde_json::from_str(frame).unwrap();
    assert!(report.data.is_none());
    assert!(report.user_id.is_none());
}
