//! Gateway configuration loading.
//!
//! Environment variables are the sole config source.
//!
//! # Required variables
//! - `CLAPI_HOST` / `CLAPI_WSHOST`: HTTP signature base and ws/wss dial URL
//! - `CLAPI_KEY` / `CLAPI_SEC`: OAuth1 consumer credentials
//! - `NAVAJO_URL` / `NAVAJO_PW`: directory service base URL and password
//!   (`NAVAJO_USER` may be empty)
//! - `GOOGLE_APPLICATION_CREDENTIALS` / `GOOGLE_PROJECT_ID`
//!
//! Durations accept Go-style suffixed values (`"20s"`, `"2m"`).  Missing
//! required values or unparseable knobs are boot-fatal.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub stream: StreamAuthConfig,
    pub directory: DirectoryConfig,
    pub store: StoreConfig,
    /// Unparseable frames tolerated per session before a forced reconnect.
    pub max_json_parse_errors: u64,
    /// WebSocket read deadline.
    pub websocket_timeout: Duration,
    /// Ingest latency outlier threshold in milliseconds.
    pub huge_differential_ms: f64,
    /// `DEBUG=true` selects verbose logging.
    pub debug: bool,
}

/// OAuth1-protected stream endpoints and consumer credentials.
#[derive(Debug, Clone)]
pub struct StreamAuthConfig {
    /// HTTP base URL; only used to build the signature base string.
    pub url: String,
    /// ws:// or wss:// URL actually dialled.
    pub ws_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

/// Directory service endpoint, Basic-auth credentials, and refresh policy.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub base_url: String,
    /// The directory accepts an empty username.
    pub user: String,
    pub password: String,
    pub rebuild_interval: Duration,
    pub stale_policy: StalePolicy,
}

/// What a successful refresh does with entries from prior refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Merge new entries over the old maps; a device that disappears from
    /// the directory stays resolvable (tolerant of transient directory
    /// gaps).  The historical default.
    Retain,
    /// Replace both maps wholesale on a fully successful refresh.
    Clear,
}

/// Document store target.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub project_id: String,
    /// Path to the service-account credentials file; presence is enforced at
    /// boot, consumption is the store client's concern.
    pub credentials_path: String,
    /// Standard `FIRESTORE_EMULATOR_HOST` override for local targets.
    pub emulator_host: Option<String>,
    /// Optional pre-minted bearer token (`GOOGLE_OAUTH_ACCESS_TOKEN`);
    /// token acquisition is otherwise the deployment's concern.
    pub access_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_MAX_JSON_PARSE_ERRORS: u64 = 100;
const DEFAULT_WEBSOCKET_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_REBUILD_INTERVAL: Duration = Duration::from_secs(120);
const DEFAULT_HUGE_DIFFERENTIAL_MS: f64 = 60_000.0;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl GatewayConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through a lookup closure.  Tests pass a map-backed
    /// closure instead of mutating process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String, ConfigError> {
            match lookup(name) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(ConfigError::Missing(name.to_owned())),
            }
        };

        let stream = StreamAuthConfig {
            url: required("CLAPI_HOST")?,
            ws_url: required("CLAPI_WSHOST")?,
            consumer_key: required("CLAPI_KEY")?,
            consumer_secret: required("CLAPI_SEC")?,
        };

        let directory = DirectoryConfig {
            base_url: required("NAVAJO_URL")?,
            user: lookup("NAVAJO_USER").unwrap_or_default(),
            password: required("NAVAJO_PW")?,
            rebuild_interval: parse_duration_var(
                &lookup,
                "NAVAJO_MAP_REBUILD_TIMER",
                DEFAULT_REBUILD_INTERVAL,
            )?,
            stale_policy: parse_stale_policy(&lookup)?,
        };

        let store = StoreConfig {
            credentials_path: required("GOOGLE_APPLICATION_CREDENTIALS")?,
            project_id: required("GOOGLE_PROJECT_ID")?,
            emulator_host: lookup("FIRESTORE_EMULATOR_HOST").filter(|h| !h.is_empty()),
            access_token: lookup("GOOGLE_OAUTH_ACCESS_TOKEN").filter(|t| !t.is_empty()),
        };

        let max_json_parse_errors = match lookup("JSON_ERRORS_BEFORE_RESTART") {
            None => DEFAULT_MAX_JSON_PARSE_ERRORS,
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: "JSON_ERRORS_BEFORE_RESTART".to_owned(),
                value: raw,
            })?,
        };

        let huge_differential_ms = match lookup("METRICS_HUGEDIFFIGNORE") {
            None => DEFAULT_HUGE_DIFFERENTIAL_MS,
            Some(raw) => raw.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                name: "METRICS_HUGEDIFFIGNORE".to_owned(),
                value: raw,
            })?,
        };

        let websocket_timeout =
            parse_duration_var(&lookup, "WEBSOCKET_TIMEOUT", DEFAULT_WEBSOCKET_TIMEOUT)?;

        let debug = lookup("DEBUG").as_deref() == Some("true");

        Ok(GatewayConfig {
            stream,
            directory,
            store,
            max_json_parse_errors,
            websocket_timeout,
            huge_differential_ms,
            debug,
        })
    }
}

fn parse_duration_var<F>(
    lookup: &F,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_owned(),
            value: raw,
        }),
    }
}

fn parse_stale_policy<F>(lookup: &F) -> Result<StalePolicy, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup("NAVAJO_MAP_STALE_POLICY").as_deref() {
        None | Some("") | Some("retain") => Ok(StalePolicy::Retain),
        Some("clear") => Ok(StalePolicy::Clear),
        Some(other) => Err(ConfigError::InvalidValue {
            name: "NAVAJO_MAP_STALE_POLICY".to_owned(),
            value: other.to_owned(),
        }),
    }
}

/// Parse a suffixed duration: `"500ms"`, `"20s"`, `"2m"`, `"1h"`.
/// A bare unit or a non-integer magnitude is rejected.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let magnitude: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(magnitude)),
        "s" => Some(Duration::from_secs(magnitude)),
        "m" => Some(Duration::from_secs(magnitude * 60)),
        "h" => Some(Duration::from_secs(magnitude * 3600)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    InvalidValue { name: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => {
                write!(f, "required environment variable {} is not set", name)
            }
            ConfigError::InvalidValue { name, value } => {
                write!(f, "invalid value for {}: {:?}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
