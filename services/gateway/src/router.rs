//! Report router: one ingress queue fans out to per-kind worker queues.
//!
//! Classification is on the envelope `type`; the typed payload parse happens
//! here so each kind queue carries ready-to-build reports.  Channels are
//! tightly bounded: a saturated writer pool stalls the router, which stalls
//! the ingestion loop, which stalls the server.

use crate::metrics::Metrics;
use fleet_protocol::{
    EldReport, Envelope, TransponderReport, VideoReport, ELD_RECORD_TYPE, REPORT_DATA_TYPE,
    VIDEO_EVENT_TYPE,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Queue capacity; near-rendezvous so backpressure reaches the socket.
pub const QUEUE_CAPACITY: usize = 1;

/// A receiver shared by a pool of workers.  Workers take the lock only for
/// the queue pop; processing happens outside it.
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub fn shared<T>(rx: mpsc::Receiver<T>) -> SharedReceiver<T> {
    Arc::new(Mutex::new(rx))
}

/// Pop the next job for one worker of a pool.
pub async fn recv_next<T>(rx: &SharedReceiver<T>) -> Option<T> {
    rx.lock().await.recv().await
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransponderJob {
    pub data_type: String,
    pub report: TransponderReport,
}

#[derive(Debug, Clone)]
pub struct EldJob {
    pub data_type: String,
    pub report: EldReport,
}

#[derive(Debug, Clone)]
pub struct VideoJob {
    pub data_type: String,
    pub report: VideoReport,
}

/// Senders for the per-kind queues, handed to the router.
pub struct KindQueues {
    pub transponder_tx: mpsc::Sender<TransponderJob>,
    pub eld_tx: mpsc::Sender<EldJob>,
    pub video_tx: mpsc::Sender<VideoJob>,
}

// ---------------------------------------------------------------------------
// Router loop
// ---------------------------------------------------------------------------

pub async fn run_router(
    mut ingress_rx: mpsc::Receiver<Envelope>,
    queues: KindQueues,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("router stopping (shutdown)");
                    return;
                }
                continue;
            }
            envelope = ingress_rx.recv() => match envelope {
                Some(e) => e,
                None => return,
            },
        };

        debug!(
            report_type = %envelope.report_type,
            data_type = %envelope.data_type,
            "routing report"
        );

        match envelope.report_type.as_str() {
            REPORT_DATA_TYPE => {
                match serde_json::from_value::<TransponderReport>(envelope.payload) {
                    Ok(report) => {
                        let job = TransponderJob {
                            data_type: envelope.data_type,
                            report,
                        };
                        if queues.transponder_tx.send(job).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        Metrics::incr(&metrics.payload_parse_failures);
                        warn!(error = %e, "transponder payload failed typed parse");
                    }
                }
            }
            ELD_RECORD_TYPE => match serde_json::from_value::<EldReport>(envelope.payload) {
                Ok(report) => {
                    let job = EldJob {
                        data_type: envelope.data_type,
                        report,
                    };
                    if queues.eld_tx.send(job).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    Metrics::incr(&metrics.payload_parse_failures);
                    warn!(error = %e, "eld payload failed typed parse");
                }
            },
            VIDEO_EVENT_TYPE => match serde_json::from_value::<VideoReport>(envelope.payload) {
                Ok(report) => {
                    let job = VideoJob {
                        data_type: envelope.data_type,
                        report,
                    };
                    if queues.video_tx.send(job).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    Metrics::incr(&metrics.payload_parse_failures);
                    warn!(error = %e, "video payload failed typed parse");
                }
            },
            other => {
                Metrics::incr(&metrics.unroutable_reports);
                info!(
                    report_type = %other,
                    data_type = %envelope.data_type,
                    "unhandled report type"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        ingress_tx: mpsc::Sender<Envelope>,
        transponder_rx: mpsc::Receiver<TransponderJob>,
        eld_rx: mpsc::Receiver<EldJob>,
        video_rx: mpsc::Receiver<VideoJob>,
        metrics: Arc<Metrics>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn start_router() -> Harness {
        let (ingress_tx, ingress_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (transponder_tx, transponder_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (eld_tx, eld_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (video_tx, video_rx) = mpsc::channel(QUEUE_CAPACITY);
        let metrics = Arc::new(Metrics::new(60_000.0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_router(
            ingress_rx,
            KindQueues {
                transponder_tx,
                eld_tx,
                video_tx,
            },
            Arc::clone(&metrics),
            shutdown_rx,
        ));
        Harness {
            ingress_tx,
            transponder_rx,
            eld_rx,
            video_rx,
            metrics,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn envelope(report_type: &str, data_type: &str, payload: serde_json::Value) -> Envelope {
        Envelope {
            report_type: report_type.to_owned(),
            data_type: data_type.to_owned(),
            payload,
        }
    }

    #[tokio::test]
    async fn report_data_routes_to_transponder_queue() {
        let mut h = start_router();
        h.ingress_tx
            .send(envelope(
                "REPORT_DATA",
                "status",
                serde_json::json!({"transponderId": 9000, "accountId": 100}),
            ))
            .await
            .unwrap();
        let job = h.transponder_rx.recv().await.expect("job");
        assert_eq!(job.data_type, "status");
        assert_eq!(job.report.transponder_id, Some(9000.0));
    }

    #[tokio::test]
    async fn eld_record_routes_to_eld_queue() {
        let mut h = start_router();
        h.ingress_tx
            .send(envelope(
                "ELD_RECORD",
                "navigation",
                serde_json::json!({"accountId": 200, "data": {"userId": 55}}),
            ))
            .await
            .unwrap();
        let job = h.eld_rx.recv().await.expect("job");
        assert_eq!(job.data_type, "navigation");
        assert_eq!(job.report.account_id, Some(200.0));
    }

    #[tokio::test]
    async fn video_event_routes_to_video_queue() {
        let mut h = start_router();
        h.ingress_tx
            .send(envelope(
                "VIDEO_EVENT",
                "hard_braking",
                serde_json::json!({"videoEventId": "v-1"}),
            ))
            .await
            .unwrap();
        let job = h.video_rx.recv().await.expect("job");
        assert_eq!(job.report.video_event_id.as_deref(), Some("v-1"));
    }

    #[tokio::test]
    async fn unknown_type_is_counted_and_dropped() {
        let mut h = start_router();
        h.ingress_tx
            .send(envelope("MYSTERY", "status", serde_json::json!({})))
            .await
            .unwrap();
        // A subsequent good report proves the router is still alive.
        h.ingress_tx
            .send(envelope(
                "REPORT_DATA",
                "status",
                serde_json::json!({"transponderId": 1, "accountId": 2}),
            ))
            .await
            .unwrap();
        let _ = h.transponder_rx.recv().await.expect("job");
        assert_eq!(Metrics::get(&h.metrics.unroutable_reports), 1);
    }
}
