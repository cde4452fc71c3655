//! Request canonicalization and HMAC signing for the BingX REST API.
//!
//! Every authenticated request derives two strings from the same sorted
//! parameter set: the *signing string* (unencoded, what the HMAC covers) and
//! the *transmission string* (what goes on the wire as the query). Both carry
//! the identical `timestamp` value, so signing and transmission can never
//! disagree about when the request was made.

use std::collections::BTreeMap;

use error_stack::Report;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;

use crate::error::{ConfigError, SignError};

type HmacSha256 = Hmac<Sha256>;

/// Everything except unreserved characters (`A-Za-z0-9-_.~`) gets escaped,
/// space included (`%20`, never `+`).
const VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Millisecond-epoch time source, injectable so tests can pin the timestamp.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// API key pair for the signed exchange, passed in explicitly at client
/// construction (no process-global reads).
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

/// Request parameters awaiting canonicalization.
///
/// Backed by a `BTreeMap`, so keys are unique and iteration is already in
/// ascending lexicographic order; insertion order never matters.
#[derive(Debug, Clone, Default)]
pub struct ParamSet(BTreeMap<String, String>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.insert(key.into(), value.to_string());
        self
    }
}

/// The two canonical encodings of one parameter set, sharing one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalQuery {
    /// Unencoded `key=value&…&timestamp=<ts>`; the HMAC is computed over this.
    pub signing: String,
    /// Sent as the actual query string. Identical to `signing` unless any
    /// value looks array/object-shaped, in which case *every* value is
    /// percent-encoded (see `canonicalize`).
    pub transmission: String,
    pub timestamp_ms: i64,
}

/// Build the signing and transmission strings for `params` at `timestamp_ms`.
///
/// Keys are joined in ascending order as unencoded `key=value` pairs, then
/// `timestamp` is appended last (after the sorted keys, not sorted in — a key
/// like `zzz` still precedes it). If the resulting signing string contains a
/// literal `[` or `{` anywhere, the transmission string percent-encodes every
/// value, not just the offending one. The all-or-nothing trigger matches the
/// string the live API verifies signatures against; changing it changes the
/// transmitted bytes.
pub fn canonicalize(params: &ParamSet, timestamp_ms: i64) -> CanonicalQuery {
    let signing = join_pairs(params, timestamp_ms, false);
    let needs_encoding = signing.contains('[') || signing.contains('{');
    let transmission = if needs_encoding {
        join_pairs(params, timestamp_ms, true)
    } else {
        signing.clone()
    };

    CanonicalQuery {
        signing,
        transmission,
        timestamp_ms,
    }
}

fn join_pairs(params: &ParamSet, timestamp_ms: i64, encode_values: bool) -> String {
    let mut joined = params
        .0
        .iter()
        .map(|(key, value)| {
            if encode_values {
                format!("{}={}", key, utf8_percent_encode(value, VALUE_ENCODE_SET))
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&");

    if joined.is_empty() {
        joined = format!("timestamp={timestamp_ms}");
    } else {
        joined.push_str(&format!("&timestamp={timestamp_ms}"));
    }
    joined
}

/// HMAC-SHA256 over the UTF-8 bytes of `payload`, keyed by `secret`,
/// returned as 64 lowercase hex characters.
///
/// An empty secret is a configuration fault, not a signable state.
pub fn sign(secret: &str, payload: &str) -> Result<String, Report<SignError>> {
    if secret.is_empty() {
        return Err(Report::new(SignError::EmptySecret));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Report::new(SignError::Mac))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// A fully addressed authenticated request, ready for an HTTP client.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub header_name: &'static str,
    pub header_value: String,
    pub timestamp_ms: i64,
}

pub const API_KEY_HEADER: &str = "X-BX-APIKEY";

/// Compose `{base}{path}?{transmission}&signature={hex}` plus the public-key
/// header. Pure apart from reading the clock once; independent calls share no
/// state and may run concurrently.
pub fn build_signed_request(
    base: &str,
    path: &str,
    params: &ParamSet,
    credentials: &ApiCredentials,
    clock: &dyn Clock,
) -> Result<SignedRequest, Report<SignError>> {
    if credentials.api_key.is_empty() {
        return Err(Report::new(SignError::EmptyApiKey));
    }

    let query = canonicalize(params, clock.now_millis());
    let signature = sign(&credentials.api_secret, &query.signing)?;

    Ok(SignedRequest {
        url: format!("{base}{path}?{}&signature={signature}", query.transmission),
        header_name: API_KEY_HEADER,
        header_value: credentials.api_key.clone(),
        timestamp_ms: query.timestamp_ms,
    })
}

/// Read a required credential from the environment, rejecting empty values.
pub fn env_credential(name: &str) -> Result<String, Report<ConfigError>> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Report::new(ConfigError::MissingCredential {
                name: name.to_string(),
            })
        })
}
