//! Single-leg OAuth 1.0a request signing (RFC 5849, HMAC-SHA1).
//!
//! The stream API authenticates the WebSocket upgrade with an OAuth1
//! `Authorization` header computed over the HTTP-equivalent GET request.
//! Query parameters participate in the signature base but never appear in
//! the header; single-leg means the token and token secret are empty.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::collections::BTreeMap;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";
const AUTHORIZATION_PREFIX: &str = "OAuth ";

const CONSUMER_KEY_PARAM: &str = "oauth_consumer_key";
const NONCE_PARAM: &str = "oauth_nonce";
const SIGNATURE_PARAM: &str = "oauth_signature";
const SIGNATURE_METHOD_PARAM: &str = "oauth_signature_method";
const TIMESTAMP_PARAM: &str = "oauth_timestamp";
const VERSION_PARAM: &str = "oauth_version";

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Holds the consumer credentials and produces `Authorization` headers.
#[derive(Debug, Clone)]
pub struct Signer {
    consumer_key: String,
    consumer_secret: String,
}

impl Signer {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    /// Build the `Authorization` header for a request.
    ///
    /// `query` holds request query parameters; they are folded into the
    /// signature base and then dropped from the emitted header.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        query: &BTreeMap<String, String>,
    ) -> Result<String, SignError> {
        let timestamp = chrono::Utc::now().timestamp();
        self.header_at(method, url, query, timestamp, &nonce())
    }

    /// Deterministic variant: callers supply timestamp and nonce.  The
    /// public entry point feeds in fresh values; tests pin them.
    fn header_at(
        &self,
        method: &str,
        url: &str,
        query: &BTreeMap<String, String>,
        timestamp: i64,
        nonce: &str,
    ) -> Result<String, SignError> {
        let mut oauth_params = BTreeMap::from([
            (CONSUMER_KEY_PARAM.to_owned(), self.consumer_key.clone()),
            (
                SIGNATURE_METHOD_PARAM.to_owned(),
                SIGNATURE_METHOD.to_owned(),
            ),
            (TIMESTAMP_PARAM.to_owned(), timestamp.to_string()),
            (NONCE_PARAM.to_owned(), nonce.to_owned()),
            (VERSION_PARAM.to_owned(), OAUTH_VERSION.to_owned()),
        ]);

        // Query parameters join the signature base only.
        let mut signed_params = oauth_params.clone();
        for (k, v) in query {
            signed_params.insert(k.clone(), v.clone());
        }

        let base = signature_base(method, url, &signed_params)?;
        let signature = hmac_sign(&self.consumer_secret, "", &base)?;
        oauth_params.insert(SIGNATURE_PARAM.to_owned(), signature);

        Ok(header_value(&oauth_params))
    }
}

// ---------------------------------------------------------------------------
// Signature base construction (RFC 5849 §3.4.1)
// ---------------------------------------------------------------------------

/// `METHOD&percent(base_uri)&percent(normalized_params)`.
fn signature_base(
    method: &str,
    url: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, SignError> {
    let base_uri = base_uri(url)?;
    Ok([
        method.to_uppercase(),
        percent_encode(&base_uri),
        percent_encode(&normalized_param_string(params)),
    ]
    .join("&"))
}

/// Scheme and host lowercased; default ports (80/http, 443/https) stripped;
/// query and fragment dropped.
fn base_uri(raw: &str) -> Result<String, SignError> {
    let url = url::Url::parse(raw).map_err(|e| SignError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| SignError::InvalidUrl {
        url: raw.to_owned(),
        reason: "no host".to_owned(),
    })?;
    // Url::port() already reports None for a scheme's default port.
    match url.port() {
        Some(port) => Ok(format!(
            "{}://{}:{}{}",
            url.scheme(),
            host.to_lowercase(),
            port,
            url.path()
        )),
        None => Ok(format!(
            "{}://{}{}",
            url.scheme(),
            host.to_lowercase(),
            url.path()
        )),
    }
}

/// Encoded pairs sorted by key, joined `k=v` with `&` (RFC 5849 §3.4.1.3.2).
/// A BTreeMap keeps the ordering law independent of insertion order.
fn normalized_param_string(params: &BTreeMap<String, String>) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode per RFC 3986 §2.1: unreserved octets pass through,
/// everything else becomes `%HH` with uppercase hex.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn is_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~')
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// HMAC-SHA1 with key `consumer_secret&token_secret`, base64 output.
fn hmac_sign(consumer_secret: &str, token_secret: &str, message: &str) -> Result<String, SignError> {
    let key = format!("{}&{}", consumer_secret, token_secret);
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).map_err(|_| SignError::InvalidKey)?;
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

/// 256 bits of randomness, base64-URL without padding.
fn nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// `OAuth k1="v1", k2="v2", ...`: encoded, sorted by key (RFC 5849 §3.5.1).
fn header_value(oauth_params: &BTreeMap<String, String>) -> String {
    let mut encoded: Vec<(String, String)> = oauth_params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let pairs: Vec<String> = encoded
        .into_iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    format!("{}{}", AUTHORIZATION_PREFIX, pairs.join(", "))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("cannot sign request for {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("signing key rejected by HMAC")]
    InvalidKey,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
