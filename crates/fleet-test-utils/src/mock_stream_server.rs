//! mock_stream_server: A mock stream WebSocket server for testing the
//! gateway's session layer.
//!
//! Accepts connections on ws://127.0.0.1:<port>/v2/stream, records each
//! upgrade request (path, query string, `Authorization` header), plays a
//! per-connection script of frames, and then keeps reading, recording every
//! client text frame, until the client goes away.
//!
//! Connection N plays script N; connections beyond the scripted count get an
//! empty script (send nothing, just listen).

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

/// One step of a connection script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Send a text frame.
    Text(String),
    /// Close the connection from the server side.
    Close,
}

impl ScriptStep {
    pub fn text(frame: impl Into<String>) -> Self {
        ScriptStep::Text(frame.into())
    }

    /// A report frame from a JSON value.
    pub fn report(value: serde_json::Value) -> Self {
        ScriptStep::Text(value.to_string())
    }

    /// The server keep-alive frame.
    pub fn keep_alive() -> Self {
        ScriptStep::Text("{}".to_owned())
    }
}

/// What the server saw in one upgrade request.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Default)]
struct ServerState {
    scripts: VecDeque<Vec<ScriptStep>>,
    connections: Vec<ConnectionRecord>,
    client_frames: Vec<String>,
}

pub struct MockStreamServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockStreamServer {
    /// Start the mock server with one script per expected connection.
    pub async fn start(scripts: Vec<Vec<ScriptStep>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState {
            scripts: scripts.into(),
            ..ServerState::default()
        }));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let conn_state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    handle_connection(stream, conn_state).await;
                });
            }
        });

        Ok(Self {
            addr,
            state,
            _task: task,
        })
    }

    /// The ws:// URL clients should dial (no query string).
    pub fn ws_url(&self) -> String {
        format!("ws://{}/v2/stream", self.addr)
    }

    /// The matching http:// URL used as the signature base.
    pub fn http_url(&self) -> String {
        format!("http://{}/v2/stream", self.addr)
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.state
            .lock()
            .map(|s| s.connections.clone())
            .unwrap_or_default()
    }

    pub fn client_frames(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.client_frames.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` connections arrived.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.connections().len() >= count).await
    }

    /// Wait until the client sent a given text frame.
    pub async fn wait_for_client_frame(&self, expected: &str, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.client_frames().iter().any(|f| f == expected)
        })
        .await
    }
}

async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, state: Arc<Mutex<ServerState>>) {
    let record_state = Arc::clone(&state);
    let callback = move |req: &Request, resp: Response| {
        let record = ConnectionRecord {
            path: req.uri().path().to_owned(),
            query: req.uri().query().map(str::to_owned),
            authorization: req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        };
        if let Ok(mut s) = record_state.lock() {
            s.connections.push(record);
        }
        Ok(resp)
    };

    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let script = state
        .lock()
        .ok()
        .and_then(|mut s| s.scripts.pop_front())
        .unwrap_or_default();

    for step in script {
        match step {
            ScriptStep::Text(frame) => {
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            ScriptStep::Close => {
                let _ = ws.close(None).await;
                return;
            }
        }
    }

    // Listen for client frames (keep-alive echoes and the like) until the
    // client disconnects.
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(mut s) = state.lock() {
                    s.client_frames.push(text.to_string());
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
