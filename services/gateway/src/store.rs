//! Document store seam.
//!
//! The storage engine itself is an external collaborator; the gateway only
//! needs "create a document under this path, auto-assigned ID".  Writers
//! talk to the [`DocumentStore`] trait; production wires [`FirestoreStore`]
//! (a thin REST client honoring the standard `FIRESTORE_EMULATOR_HOST`
//! convention), tests wire [`MemoryStore`].

use crate::config::StoreConfig;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PUBLIC_BASE_URL: &str = "https://firestore.googleapis.com/v1";

// ---------------------------------------------------------------------------
// DocumentPath
// ---------------------------------------------------------------------------

/// A parent collection path: alternating collection/document segments,
/// starting and ending with a collection.
///
/// `DocumentPath::collection("account").doc("A1").collection("vehicle")...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    pub fn doc(mut self, id: impl Into<String>) -> Self {
        self.segments.push(id.into());
        self
    }

    pub fn sub(mut self, collection: impl Into<String>) -> Self {
        self.segments.push(collection.into());
        self
    }

    /// Every segment non-empty and the path ends on a collection.  A report
    /// never reaches a store with placeholder or empty identifiers.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath {
                path: self.to_string(),
                reason: "path must end on a collection".to_owned(),
            });
        }
        if self.segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath {
                path: self.to_string(),
                reason: "empty path segment".to_owned(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

// ---------------------------------------------------------------------------
// DocumentStore trait
// ---------------------------------------------------------------------------

/// One-way document creation; the store assigns the document ID and the
/// creation timestamp.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(
        &self,
        parent: &DocumentPath,
        document: serde_json::Value,
    ) -> Result<String, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store used by the test suite.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Vec<StoredDocument>>>,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub path: String,
    pub id: String,
    pub document: serde_json::Value,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        self.inner.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(
        &self,
        parent: &DocumentPath,
        document: serde_json::Value,
    ) -> Result<String, StoreError> {
        parent.validate()?;
        let id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().map_err(|_| StoreError::Internal)?;
        inner.push(StoredDocument {
            path: parent.to_string(),
            id: id.clone(),
            document,
        });
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// FirestoreStore
// ---------------------------------------------------------------------------

/// Thin REST client for the document store.
///
/// `POST {base}/projects/{project}/databases/(default)/documents/{parent}`
/// with the document encoded as typed `fields`; the server assigns the
/// document ID and `createTime` (surfaced at rest as `fsCreateTimestamp`).
pub struct FirestoreStore {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    bearer: Option<String>,
}

impl FirestoreStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let (base_url, bearer) = match &cfg.emulator_host {
            // The emulator convention: plain HTTP, "owner" bearer.
            Some(host) => (format!("http://{}/v1", host), Some("owner".to_owned())),
            None => (PUBLIC_BASE_URL.to_owned(), cfg.access_token.clone()),
        };
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(StoreError::Http)?;
        Ok(Self {
            http,
            base_url,
            project_id: cfg.project_id.clone(),
            bearer,
        })
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn create(
        &self,
        parent: &DocumentPath,
        document: serde_json::Value,
    ) -> Result<String, StoreError> {
        parent.validate()?;
        let url = format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url, self.project_id, parent
        );
        let body = serde_json::json!({ "fields": encode_fields(&document)? });

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(StoreError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                path: parent.to_string(),
                status: status.as_u16(),
            });
        }

        #[derive(serde::Deserialize)]
        struct Created {
            name: String,
        }
        let created: Created = response.json().await.map_err(StoreError::Http)?;
        let id = created
            .name
            .rsplit('/')
            .next()
            .unwrap_or(&created.name)
            .to_owned();
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Typed-value encoding
// ---------------------------------------------------------------------------

/// Encode a plain JSON object into the store's typed `fields` map.
fn encode_fields(
    document: &serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    let object = document.as_object().ok_or(StoreError::NotAnObject)?;
    let mut fields = serde_json::Map::new();
    for (key, value) in object {
        fields.insert(key.clone(), encode_value(value)?);
    }
    Ok(fields)
}

fn encode_value(value: &serde_json::Value) -> Result<serde_json::Value, StoreError> {
    use serde_json::{json, Value};
    Ok(match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // Integers travel as strings in the REST schema.
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64() })
            }
        }
        Value::String(s) => {
            // RFC 3339 strings are our serialized instants; store them typed.
            if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                json!({ "timestampValue": s })
            } else {
                json!({ "stringValue": s })
            }
        }
        Value::Array(items) => {
            let values: Result<Vec<_>, _> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values? } })
        }
        Value::Object(map) => {
            // A bare lat/long pair is a first-class geo point.
            if map.len() == 2 && map.contains_key("latitude") && map.contains_key("longitude") {
                json!({ "geoPointValue": map })
            } else {
                let mut fields = serde_json::Map::new();
                for (key, inner) in map {
                    fields.insert(key.clone(), encode_value(inner)?);
                }
                json!({ "mapValue": { "fields": fields } })
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid document path {path}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("store request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("store returned status {status} for {path}")]
    Status { path: String, status: u16 },
    #[error("store state unavailable")]
    Internal,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
