//! Stream WebSocket session: dial, read pump, reconnect loop.
//!
//! # Session lifecycle
//! 1. Build the optional query string (`keepAlive=passive`,
//!    `checkpoint=<n>`), sorted by key.
//! 2. Sign the HTTP-equivalent GET (query params join the signature base,
//!    not the header) and dial the ws/wss URL with the `Authorization`
//!    header.
//! 3. Pump frames under a read deadline: `"{}"` keep-alives are echoed,
//!    report frames update the checkpoint cursor and dispatch to the router.
//! 4. Any read error, deadline expiry, or an exceeded JSON-error budget ends
//!    the session; the ingestor redials with the latest checkpoint after a
//!    5 s back-off on dial failure.

use crate::config::StreamAuthConfig;
use crate::metrics::Metrics;
use crate::oauth::{SignError, Signer};
use chrono::{DateTime, Utc};
use fleet_protocol::{Envelope, EnvelopeHead};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

/// The server's keep-alive frame, echoed verbatim.
pub const KEEP_ALIVE_FRAME: &str = "{}";

const DIAL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Session options
// ---------------------------------------------------------------------------

/// Optional dial parameters.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Ask the server to keep the stream open without client-driven pings.
    pub passive_keep_alive: bool,
    /// Resume cursor from a prior session; `None` dials fresh.
    pub checkpoint: Option<f64>,
}

impl SessionOptions {
    pub fn query_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if self.passive_keep_alive {
            params.insert("keepAlive".to_owned(), "passive".to_owned());
        }
        if let Some(checkpoint) = self.checkpoint {
            params.insert(
                "checkpoint".to_owned(),
                fleet_protocol::canonical_id(checkpoint),
            );
        }
        params
    }

    /// `""` or `?k=v&k=v`, keys sorted.
    pub fn query_string(&self) -> String {
        let params = self.query_params();
        if params.is_empty() {
            return String::new();
        }
        let joined: Vec<String> = params
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("?{}", joined.join("&"))
    }
}

// ---------------------------------------------------------------------------
// Ingestion progress
// ---------------------------------------------------------------------------

/// Per-process ingestion cursor; survives session restarts, not the process.
#[derive(Debug, Clone, Default)]
pub struct IngestionProgress {
    /// Most recent server-advertised checkpoint; 0 means none seen yet.
    pub checkpoint: f64,
    pub latest_keepalive: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Dial
// ---------------------------------------------------------------------------

/// Dial the stream WebSocket with a signed `Authorization` header.
pub async fn dial(
    stream: &StreamAuthConfig,
    signer: &Signer,
    options: &SessionOptions,
) -> Result<WsStream, SessionError> {
    let query = options.query_string();
    let http_url = format!("{}{}", stream.url, query);
    let header = signer.authorization_header("GET", &http_url, &options.query_params())?;

    let ws_url = format!("{}{}", stream.ws_url, query);
    let mut request = ws_url
        .as_str()
        .into_client_request()
        .map_err(SessionError::Ws)?;
    request.headers_mut().insert(
        "Authorization",
        header.parse().map_err(|_| SessionError::BadAuthHeader)?,
    );

    debug!(url = %ws_url, "opening stream websocket");
    let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

// ---------------------------------------------------------------------------
// Frame classification
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum ProcessedFrame {
    /// Server keep-alive; the pump echoes it.
    KeepAlive,
    /// Routable report, ready for the ingress queue.
    Dispatch(Envelope),
    /// Parsed but unroutable (missing `type`/`dataType` or not an object).
    Dropped,
    /// Not JSON at all; counts against the session's error budget.
    Unparseable,
}

/// Peek at `data.reportTimestamp` for latency accounting without committing
/// to a report kind.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatencyPeek {
    #[serde(default)]
    data: Option<LatencyPeekData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatencyPeekData {
    report_timestamp: Option<f64>,
}

pub(crate) fn classify_frame(
    text: &str,
    progress: &mut IngestionProgress,
    metrics: &Metrics,
) -> ProcessedFrame {
    if text == KEEP_ALIVE_FRAME {
        progress.latest_keepalive = Some(Utc::now());
        Metrics::incr(&metrics.keepalives_received);
        debug!(at = ?progress.latest_keepalive, "stream keep-alive received");
        return ProcessedFrame::KeepAlive;
    }

    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            Metrics::incr(&metrics.unparseable_samples);
            return ProcessedFrame::Unparseable;
        }
    };

    let head: EnvelopeHead =
        serde_json::from_value(value.clone()).unwrap_or_default();

    // The checkpoint advances even when the report is rejected below:
    // malformed records are not worth replaying after a reconnect.
    if let Some(checkpoint) = head.checkpoint {
        progress.checkpoint = checkpoint;
        debug!(checkpoint = %fleet_protocol::canonical_id(checkpoint), "checkpoint advanced");
    }

    if let Ok(peek) = serde_json::from_value::<LatencyPeek>(value.clone()) {
        if let Some(report_ts) = peek.data.and_then(|d| d.report_timestamp) {
            let now_ms = Utc::now().timestamp_millis() as f64;
            metrics.observe_latency(now_ms - report_ts);
        }
    }

    match (head.report_type, head.data_type) {
        (Some(report_type), Some(data_type))
            if !report_type.is_empty() && !data_type.is_empty() =>
        {
            ProcessedFrame::Dispatch(Envelope {
                report_type,
                data_type,
                payload: value,
            })
        }
        (report_type, data_type) => {
            if report_type.is_none() {
                Metrics::incr(&metrics.reports_missing_type);
            }
            if data_type.is_none() {
                Metrics::incr(&metrics.reports_missing_data_type);
            }
            warn!("report frame does not satisfy type/dataType checks");
            ProcessedFrame::Dropped
        }
    }
}

// ---------------------------------------------------------------------------
// Read pump
// ---------------------------------------------------------------------------

/// Pump config: the read deadline and the per-session JSON error budget.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub read_timeout: Duration,
    pub max_json_parse_errors: u64,
}

/// Consume frames until shutdown, a read error, or budget exceedance.
///
/// Generic over the stream so tests can drive it against any transport.
/// Every inbound frame (pongs included) resets the read deadline, which is
/// the client-side equivalent of a pong handler extending it.
pub async fn run_read_pump<S>(
    mut ws: S,
    cfg: &PumpConfig,
    progress: &mut IngestionProgress,
    ingress_tx: &mpsc::Sender<Envelope>,
    metrics: &Metrics,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let mut parse_errors: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = ws.close().await;
                    return Ok(());
                }
                continue;
            }
            next = tokio::time::timeout(cfg.read_timeout, ws.next()) => next,
        };

        let msg = match next {
            Err(_) => return Err(SessionError::ReadTimeout),
            Ok(None) => return Err(SessionError::Closed),
            Ok(Some(Err(e))) => {
                warn!(error = %e, "websocket read error");
                return Err(SessionError::Ws(e));
            }
            Ok(Some(Ok(m))) => m,
        };

        match msg {
            Message::Text(text) => match classify_frame(text.as_str(), progress, metrics) {
                ProcessedFrame::KeepAlive => {
                    ws.send(Message::Text(KEEP_ALIVE_FRAME.into())).await?;
                }
                ProcessedFrame::Dispatch(envelope) => {
                    if ingress_tx.send(envelope).await.is_err() {
                        return Err(SessionError::PipelineClosed);
                    }
                }
                ProcessedFrame::Dropped => {}
                ProcessedFrame::Unparseable => {
                    parse_errors += 1;
                    if parse_errors > cfg.max_json_parse_errors {
                        warn!(
                            budget = cfg.max_json_parse_errors,
                            "too many unparseable frames, restarting connection"
                        );
                        return Err(SessionError::ParseBudgetExceeded {
                            budget: cfg.max_json_parse_errors,
                        });
                    }
                }
            },
            Message::Ping(data) => {
                ws.send(Message::Pong(data)).await?;
            }
            Message::Pong(_) => {
                debug!("websocket pong received, read deadline extended");
            }
            Message::Close(frame) => {
                let expected = matches!(
                    frame.as_ref().map(|f| f.code),
                    Some(CloseCode::Away) | Some(CloseCode::Abnormal)
                );
                if !expected {
                    info!(?frame, "unexpected websocket close");
                }
                return Err(SessionError::Closed);
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestor: reconnect loop
// ---------------------------------------------------------------------------

/// Own the session across restarts: dial (resuming from the latest
/// checkpoint when one exists), pump until the session dies, repeat.
pub async fn run_ingestor(
    stream: StreamAuthConfig,
    signer: Signer,
    pump_cfg: PumpConfig,
    ingress_tx: mpsc::Sender<Envelope>,
    metrics: std::sync::Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut progress = IngestionProgress::default();
    loop {
        if *shutdown.borrow() {
            return;
        }

        let options = if progress.checkpoint == 0.0 {
            SessionOptions::default()
        } else {
            debug!(
                checkpoint = %fleet_protocol::canonical_id(progress.checkpoint),
                "resuming stream from checkpoint"
            );
            SessionOptions {
                passive_keep_alive: false,
                checkpoint: Some(progress.checkpoint),
            }
        };

        let ws = match dial(&stream, &signer, &options).await {
            Ok(ws) => ws,
            Err(e) => {
                error!(error = %e, "cannot open stream websocket; sleeping and retrying");
                tokio::select! {
                    _ = tokio::time::sleep(DIAL_RETRY_DELAY) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                continue;
            }
        };

        match run_read_pump(
            ws,
            &pump_cfg,
            &mut progress,
            &ingress_tx,
            &metrics,
            shutdown.clone(),
        )
        .await
        {
            Ok(()) => return, // shutdown
            Err(SessionError::PipelineClosed) => {
                error!("report pipeline closed; stopping ingestion");
                return;
            }
            Err(e) => {
                Metrics::incr(&metrics.session_restarts);
                warn!(
                    error = %e,
                    checkpoint = %fleet_protocol::canonical_id(progress.checkpoint),
                    "stream session ended, reconnecting"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("WS: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("signing: {0}")]
    Sign(#[from] SignError),
    #[error("authorization header not valid for HTTP")]
    BadAuthHeader,
    #[error("no frame within the read deadline")]
    ReadTimeout,
    #[error("connection closed")]
    Closed,
    #[error("more than {budget} unparseable frames in one session")]
    ParseBudgetExceeded { budget: u64 },
    #[error("report pipeline closed")]
    PipelineClosed,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
