//! mock_directory: A mock identifier-directory HTTP service.
//!
//! Serves `GET /v1/devices` and `GET /v1/accounts` with configurable JSON
//! arrays, records every request (endpoint, query string, `Authorization`
//! header), and can be switched to a non-200 status to exercise refresh
//! failure handling.

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub endpoint: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug)]
struct DirectoryState {
    devices: serde_json::Value,
    accounts: serde_json::Value,
    status: u16,
    requests: Vec<RecordedRequest>,
}

pub struct MockDirectoryServer {
    addr: SocketAddr,
    state: Arc<Mutex<DirectoryState>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockDirectoryServer {
    pub async fn start(
        devices: serde_json::Value,
        accounts: serde_json::Value,
    ) -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(DirectoryState {
            devices,
            accounts,
            status: 200,
            requests: Vec::new(),
        }));

        let router = Router::new()
            .route("/v1/devices", get(serve_devices))
            .route("/v1/accounts", get(serve_accounts))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            addr,
            state,
            _task: task,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_devices(&self, devices: serde_json::Value) {
        if let Ok(mut s) = self.state.lock() {
            s.devices = devices;
        }
    }

    pub fn set_accounts(&self, accounts: serde_json::Value) {
        if let Ok(mut s) = self.state.lock() {
            s.accounts = accounts;
        }
    }

    /// Force every listing response to the given status code.
    pub fn set_status(&self, status: u16) {
        if let Ok(mut s) = self.state.lock() {
            s.status = status;
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }
}

async fn serve_devices(
    State(state): State<Arc<Mutex<DirectoryState>>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    serve_listing(&state, "/v1/devices", query, &headers, |s| {
        s.devices.clone()
    })
}

async fn serve_accounts(
    State(state): State<Arc<Mutex<DirectoryState>>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    serve_listing(&state, "/v1/accounts", query, &headers, |s| {
        s.accounts.clone()
    })
}

fn serve_listing(
    state: &Arc<Mutex<DirectoryState>>,
    endpoint: &str,
    query: Option<String>,
    headers: &HeaderMap,
    body: impl Fn(&DirectoryState) -> serde_json::Value,
) -> (StatusCode, Json<serde_json::Value>) {
    let Ok(mut s) = state.lock() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "state poisoned"})),
        );
    };
    s.requests.push(RecordedRequest {
        endpoint: endpoint.to_owned(),
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    });
    let status = StatusCode::from_u16(s.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status != StatusCode::OK {
        return (status, Json(serde_json::json!({"error": "forced status"})));
    }
    (StatusCode::OK, Json(body(&s)))
}
