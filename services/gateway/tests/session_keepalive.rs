//! Keep-alive handling: the `"{}"` frame is echoed, timestamped, and never
//! reaches the report pipeline.

use gateway::metrics::Metrics;
use gateway::session::{run_read_pump, IngestionProgress, PumpConfig};
use fleet_test_utils::{MockStreamServer, ScriptStep};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn keep_alive_is_echoed_without_queue_traffic() {
    let server = MockStreamServer::start(vec![vec![ScriptStep::keep_alive()]])
        .await
        .expect("server");

    let (ws, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .expect("connect");

    let (ingress_tx, mut ingress_rx) = mpsc::channel(1);
    let metrics = Arc::new(Metrics::new(60_000.0));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pump_metrics = Arc::clone(&metrics);
    let pump = tokio::spawn(async move {
        let mut progress = IngestionProgress::default();
        let cfg = PumpConfig {
            read_timeout: Duration::from_secs(5),
            max_json_parse_errors: 100,
        };
        let result = run_read_pump(
            ws,
            &cfg,
            &mut progress,
            &ingress_tx,
            &pump_metrics,
            shutdown_rx,
        )
        .await;
        (result, progress)
    });

    // The server must receive the echo back.
    assert!(
        server
            .wait_for_client_frame("{}", Duration::from_secs(2))
            .await,
        "keep-alive was not echoed"
    );

    let _ = shutdown_tx.send(true);
    let (result, progress) = pump.await.expect("pump task");
    assert!(result.is_ok(), "pump should exit cleanly on shutdown");
    assert!(progress.latest_keepalive.is_some());
    assert_eq!(progress.checkpoint, 0.0);
    assert_eq!(Metrics::get(&metrics.keepalives_received), 1);

    // No queue traffic for keep-alives.
    assert!(ingress_rx.try_recv().is_err());
}
