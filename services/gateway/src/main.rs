// gateway: Telematics stream ingestion gateway.
//
// Boot order: config → runtime record → directory refresher (and wait for
// the first successful mapping) → writer pools → router → WebSocket
// ingestor.  Shutdown broadcasts through a watch channel, sleeps briefly so
// in-flight writes flush, then exits.

use gateway::config::GatewayConfig;
use gateway::directory::{self, DirectoryClient};
use gateway::oauth::Signer;
use gateway::router::{self, KindQueues, QUEUE_CAPACITY};
use gateway::runtime::Runtime;
use gateway::session::{self, PumpConfig};
use gateway::store::{DocumentStore, FirestoreStore};
use gateway::writers;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const TRANSPONDER_WRITERS: usize = 5;
const ELD_WRITERS: usize = 2;
const BOOT_POLL_DELAY: Duration = Duration::from_secs(2);
const FLUSH_DELAY: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() {
    let cfg = match GatewayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let runtime = Runtime::new(cfg.huge_differential_ms);

    // -------------------------------------------------------------------
    // Directory refresher: start polling, then request an immediate
    // rebuild and hold boot until the mapping is usable.  Failing later is
    // survivable; failing before the first mapping means no report could
    // ever resolve, so bail out.
    // -------------------------------------------------------------------
    let directory_client = match DirectoryClient::new(&cfg.directory) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: cannot construct directory client: {}", e);
            std::process::exit(1);
        }
    };
    let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
    tokio::spawn(directory::run_refresher(
        directory_client,
        Arc::clone(&runtime.cache),
        cfg.directory.rebuild_interval,
        cfg.directory.stale_policy,
        trigger_rx,
        runtime.shutdown_rx(),
    ));
    let _ = trigger_tx.send(()).await;

    loop {
        {
            let cache = runtime.cache.lock().await;
            if cache.is_populated() {
                info!(
                    accounts = cache.account_count(),
                    devices = cache.device_count(),
                    "identifier mapping ready"
                );
                break;
            }
            if cache.failed_refreshes > 0 {
                error!("cannot initialize directory mapping at startup, bailing out");
                std::process::exit(1);
            }
        }
        debug!("waiting on identifier map population");
        tokio::time::sleep(BOOT_POLL_DELAY).await;
    }

    // -------------------------------------------------------------------
    // Store client and writer pools
    // -------------------------------------------------------------------
    let store: Arc<dyn DocumentStore> = match FirestoreStore::new(&cfg.store) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "unable to create document store client");
            std::process::exit(1);
        }
    };

    let (transponder_tx, transponder_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (eld_tx, eld_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (video_tx, video_rx) = mpsc::channel(QUEUE_CAPACITY);

    let transponder_rx = router::shared(transponder_rx);
    for worker in 0..TRANSPONDER_WRITERS {
        tokio::spawn(writers::run_transponder_writer(
            worker,
            Arc::clone(&store),
            Arc::clone(&runtime.cache),
            Arc::clone(&transponder_rx),
            Arc::clone(&runtime.metrics),
            runtime.shutdown_rx(),
        ));
    }

    let eld_rx = router::shared(eld_rx);
    for worker in 0..ELD_WRITERS {
        tokio::spawn(writers::run_eld_writer(
            worker,
            Arc::clone(&store),
            Arc::clone(&runtime.cache),
            Arc::clone(&eld_rx),
            Arc::clone(&runtime.metrics),
            runtime.shutdown_rx(),
        ));
    }

    tokio::spawn(writers::run_video_sink(
        router::shared(video_rx),
        Arc::clone(&runtime.metrics),
        runtime.shutdown_rx(),
    ));

    // -------------------------------------------------------------------
    // Router and ingestor
    // -------------------------------------------------------------------
    let (ingress_tx, ingress_rx) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(router::run_router(
        ingress_rx,
        KindQueues {
            transponder_tx,
            eld_tx,
            video_tx,
        },
        Arc::clone(&runtime.metrics),
        runtime.shutdown_rx(),
    ));

    let signer = Signer::new(
        cfg.stream.consumer_key.clone(),
        cfg.stream.consumer_secret.clone(),
    );
    let pump_cfg = PumpConfig {
        read_timeout: cfg.websocket_timeout,
        max_json_parse_errors: cfg.max_json_parse_errors,
    };
    tokio::spawn(session::run_ingestor(
        cfg.stream.clone(),
        signer,
        pump_cfg,
        ingress_tx,
        Arc::clone(&runtime.metrics),
        runtime.shutdown_rx(),
    ));

    info!("gateway is running");

    // -------------------------------------------------------------------
    // Signal wait and shutdown broadcast
    // -------------------------------------------------------------------
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("shutdown: SIGINT received"),
                    _ = sigterm.recv() => info!("shutdown: SIGTERM received"),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown: Ctrl-C received");
    }

    runtime.request_shutdown();

    // Let in-flight writes flush before the process exits.
    tokio::time::sleep(FLUSH_DELAY).await;

    info!(metrics = %runtime.metrics.summary(), "gateway stopped");
}
