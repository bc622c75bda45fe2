//! Video event sink.
//!
//! Footage assembly is unfinished upstream; the routing surface stays so the
//! queue wiring does not churn when the real writer lands.  Until then every
//! video event is counted and discarded.

use crate::metrics::Metrics;
use crate::router::{recv_next, SharedReceiver, VideoJob};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub async fn run_video_sink(
    rx: SharedReceiver<VideoJob>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("video sink stopping (shutdown)");
                    return;
                }
                continue;
            }
            job = recv_next(&rx) => match job {
                Some(j) => j,
                None => return,
            },
        };
        Metrics::incr(&metrics.video_events_discarded);
        debug!(
            data_type = %job.data_type,
            video_event_id = job.report.video_event_id.as_deref().unwrap_or("-"),
            "video event discarded (writer disabled)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{shared, VideoJob};
    use fleet_protocol::VideoReport;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sink_counts_and_discards() {
        let (tx, rx) = mpsc::channel(1);
        let metrics = Arc::new(Metrics::new(60_000.0));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_video_sink(shared(rx), Arc::clone(&metrics), shutdown_rx));

        tx.send(VideoJob {
            data_type: "hard_braking".to_owned(),
            report: VideoReport {
                video_event_id: Some("v-1".to_owned()),
                account_id: Some(100.0),
            },
        })
        .await
        .unwrap();
        drop(tx);

        // The sink owns the receiver; wait for the count to land.
        for _ in 0..50 {
            if Metrics::get(&metrics.video_events_discarded) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("video event was not discarded");
    }
}
