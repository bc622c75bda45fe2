//! End-to-end pipeline: stream frames through the read pump, router, and
//! writer pools into an in-memory document store.

use fleet_test_utils::{MockStreamServer, ScriptStep};
use gateway::cache::IdentifierCache;
use gateway::metrics::Metrics;
use gateway::router::{self, KindQueues, QUEUE_CAPACITY};
use gateway::session::{run_read_pump, IngestionProgress, PumpConfig};
use gateway::store::{DocumentStore, MemoryStore};
use gateway::writers;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

struct Pipeline {
    store: MemoryStore,
    metrics: Arc<Metrics>,
    ingress_tx: mpsc::Sender<fleet_protocol::Envelope>,
    shutdown_tx: watch::Sender<bool>,
}

/// Wire cache + router + writers the way the supervisor does, minus the
/// ingestor, and return the ingress side.
fn start_pipeline() -> Pipeline {
    let mut cache = IdentifierCache::new();
    cache.insert_account("100", "A1");
    cache.insert_account("200", "A2");
    cache.insert_device("9000", "D9");
    let cache = Arc::new(Mutex::new(cache));

    let store = MemoryStore::new();
    let store_dyn: Arc<dyn DocumentStore> = Arc::new(store.clone());
    let metrics = Arc::new(Metrics::new(60_000.0));
    let (shutdown_tx, _) = watch::channel(false);

    let (transponder_tx, transponder_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (eld_tx, eld_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (video_tx, video_rx) = mpsc::channel(QUEUE_CAPACITY);

    let transponder_rx = router::shared(transponder_rx);
    for worker in 0..2 {
        tokio::spawn(writers::run_transponder_writer(
            worker,
            Arc::clone(&store_dyn),
            Arc::clone(&cache),
            Arc::clone(&transponder_rx),
            Arc::clone(&metrics),
            shutdown_tx.subscribe(),
        ));
    }
    let eld_rx = router::shared(eld_rx);
    tokio::spawn(writers::run_eld_writer(
        0,
        Arc::clone(&store_dyn),
        Arc::clone(&cache),
        eld_rx,
        Arc::clone(&metrics),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(writers::run_video_sink(
        router::shared(video_rx),
        Arc::clone(&metrics),
        shutdown_tx.subscribe(),
    ));

    let (ingress_tx, ingress_rx) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(router::run_router(
        ingress_rx,
        KindQueues {
            transponder_tx,
            eld_tx,
            video_tx,
        },
        Arc::clone(&metrics),
        shutdown_tx.subscribe(),
    ));

    Pipeline {
        store,
        metrics,
        ingress_tx,
        shutdown_tx,
    }
}

async fn wait_for_documents(store: &MemoryStore, count: usize) -> bool {
    for _ in 0..200 {
        if store.len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn frames_flow_from_socket_to_store() {
    let pipeline = start_pipeline();

    let script = vec![
        // 1. Happy transponder status report.
        ScriptStep::report(serde_json::json!({
            "type": "REPORT_DATA",
            "dataType": "status",
            "transponderId": 9000,
            "accountId": 100,
            "data": {
                "reportTimestamp": 1_700_000_000_000_u64,
                "parameters": {"speed": 42}
            },
            "checkpoint": 7
        })),
        // 2. ELD navigation record.
        ScriptStep::report(serde_json::json!({
            "type": "ELD_RECORD",
            "dataType": "navigation",
            "accountId": 200,
            "data": {"userId": 55},
            "recordId": "r-1",
            "checkpoint": 8
        })),
        // 3. Non-navigation ELD record: dropped, checkpoint still advances.
        ScriptStep::report(serde_json::json!({
            "type": "ELD_RECORD",
            "dataType": "duty_status",
            "accountId": 200,
            "data": {"userId": 55},
            "checkpoint": 9
        })),
        // 4. Transponder report with an unmapped account: dropped.
        ScriptStep::report(serde_json::json!({
            "type": "REPORT_DATA",
            "dataType": "status",
            "transponderId": 9000,
            "accountId": 999,
            "checkpoint": 10
        })),
    ];
    let server = MockStreamServer::start(vec![script]).await.expect("server");

    let (ws, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .expect("connect");

    let metrics = Arc::clone(&pipeline.metrics);
    let ingress_tx = pipeline.ingress_tx.clone();
    let shutdown_rx = pipeline.shutdown_tx.subscribe();
    let pump = tokio::spawn(async move {
        let mut progress = IngestionProgress::default();
        let cfg = PumpConfig {
            read_timeout: Duration::from_secs(5),
            max_json_parse_errors: 100,
        };
        let result =
            run_read_pump(ws, &cfg, &mut progress, &ingress_tx, &metrics, shutdown_rx).await;
        (result, progress)
    });

    assert!(
        wait_for_documents(&pipeline.store, 2).await,
        "expected two documents, got {}",
        pipeline.store.len()
    );

    // The unmapped-account drop is asynchronous; give its counter a moment.
    for _ in 0..200 {
        if Metrics::get(&pipeline.metrics.reports_unmapped_identifiers) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _ = pipeline.shutdown_tx.send(true);
    let (result, progress) = pump.await.expect("pump task");
    assert!(result.is_ok());

    // Checkpoint reflects every frame, dropped ones included.
    assert_eq!(progress.checkpoint, 10.0);

    let documents = pipeline.store.documents();
    assert_eq!(documents.len(), 2);

    let transponder = documents
        .iter()
        .find(|d| d.path == "account/A1/vehicle/D9/report_data")
        .expect("transponder document");
    assert_eq!(transponder.document["type"], "status");
    assert_eq!(transponder.document["speed"], 42.0);
    assert_eq!(
        transponder.document["reportTimestamp"],
        "2023-11-14T22:13:20Z"
    );

    let eld = documents
        .iter()
        .find(|d| d.path == "account/A2/driver/55/report_data")
        .expect("eld document");
    assert_eq!(eld.document["type"], "navigation");
    assert_eq!(eld.document["recordId"], "r-1");

    assert_eq!(
        Metrics::get(&pipeline.metrics.reports_unmapped_identifiers),
        1
    );
    assert_eq!(Metrics::get(&pipeline.metrics.documents_written), 2);
    assert_eq!(Metrics::get(&pipeline.metrics.write_failures), 0);
}
