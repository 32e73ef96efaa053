//! Share-link resolver adapter.
//!
//! Translates an opaque share link into a [`FileDescriptor`] by calling the
//! external resolver API. The resolver's response schema has drifted between
//! observed provider versions (field names, key sets, size as number or as
//! free text with a unit suffix), so everything is read defensively from
//! `serde_json::Value` and normalized here; the rest of the system only ever
//! sees the stable descriptor.

use crate::config::RESOLVER_TIMEOUT_SECS;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Placeholder used when the resolver response carries no filename.
pub const UNNAMED_FILE: &str = "Unnamed_File";

/// Canonical description of a remotely hosted file, ready for relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Filename as reported by the resolver. Not sanitized; the relay
    /// pipeline must sanitize before using it as a staging path.
    pub filename: String,
    /// Direct, time-limited download URL.
    pub direct_url: String,
    /// Advertised size in bytes; 0 means unknown.
    pub size_bytes: u64,
}

/// Errors produced while resolving a share link.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Transport-level failure talking to the resolver (DNS, refused, timeout)
    #[error("Network error: {0}")]
    Network(String),
    /// The resolver understood the request but declined, or returned a body
    /// this adapter cannot make sense of
    #[error("Resolver rejected the link: {0}")]
    UpstreamRejected(String),
}

/// Client for the external share-link resolver API.
pub struct LinkResolver {
    http: HttpClient,
    api_url: String,
}

impl LinkResolver {
    /// Create a resolver pointed at `api_url` with the standard timeout.
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(RESOLVER_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            http,
            api_url: api_url.into(),
        }
    }

    /// Resolve a share link into a [`FileDescriptor`].
    ///
    /// No retry happens here; retry policy, if any, belongs to the caller.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Network`] on transport failure,
    /// [`ResolveError::UpstreamRejected`] when the resolver declines the link
    /// or returns an unusable body.
    pub async fn resolve(&self, link: &str) -> Result<FileDescriptor, ResolveError> {
        info!(link = %link, "Requesting direct link from resolver");

        let response = self
            .http
            .post(&self.api_url)
            .json(&json!({ "url": link }))
            .send()
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::UpstreamRejected(format!(
                "resolver returned {status}: {}",
                crate::utils::truncate_str(body.trim(), 300)
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ResolveError::UpstreamRejected(format!("invalid JSON response: {e}")))?;

        let descriptor = parse_resolver_response(&value)?;
        info!(
            filename = %descriptor.filename,
            size_bytes = descriptor.size_bytes,
            "Resolved share link"
        );
        Ok(descriptor)
    }
}

/// Normalize a resolver response body into a [`FileDescriptor`].
///
/// Tolerates the key spellings observed across resolver versions; a missing
/// success flag is not an error, but a missing download link is.
///
/// # Errors
///
/// Returns [`ResolveError::UpstreamRejected`] when the response signals
/// failure or carries no recognizable download link.
pub fn parse_resolver_response(value: &Value) -> Result<FileDescriptor, ResolveError> {
    if explicit_failure(value) {
        let detail = first_string(value, &["message", "error", "msg", "detail"])
            .unwrap_or_else(|| "Unknown resolver error".to_string());
        return Err(ResolveError::UpstreamRejected(detail));
    }

    let payload = payload_object(value);

    let direct_url = first_string(
        payload,
        &[
            "link",
            "direct_link",
            "dlink",
            "download_url",
            "Direct Download Link",
        ],
    )
    .ok_or_else(|| {
        ResolveError::UpstreamRejected("no download link in resolver response".to_string())
    })?;

    let filename = first_string(payload, &["filename", "file_name", "name", "title"])
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNNAMED_FILE.to_string());

    let size_bytes = first_field(payload, &["size", "file_size", "size_bytes"])
        .map_or(0, |v| match v {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0).round() as u64))
                .unwrap_or(0),
            Value::String(s) => parse_size_str(s),
            _ => 0,
        });

    Ok(FileDescriptor {
        filename,
        direct_url,
        size_bytes,
    })
}

/// Parse a free-text size such as `"15.5 MB"` into a byte count.
///
/// Units use binary multipliers (1 KB = 1024 B); a bare number is taken as
/// bytes. An unparsable string yields 0, never an error.
#[must_use]
pub fn parse_size_str(raw: &str) -> u64 {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let Ok(value) = number.trim().parse::<f64>() else {
        return 0;
    };
    if !value.is_finite() || value < 0.0 {
        return 0;
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1024,
        "MB" => 1024_u64.pow(2),
        "GB" => 1024_u64.pow(3),
        "TB" => 1024_u64.pow(4),
        _ => return 0,
    };

    (value * multiplier as f64).round() as u64
}

/// True when the response carries an explicit failure signal.
fn explicit_failure(value: &Value) -> bool {
    if let Some(ok) = value.get("success").and_then(Value::as_bool) {
        return !ok;
    }
    if let Some(status) = value.get("status").and_then(Value::as_str) {
        return !(status.eq_ignore_ascii_case("success") || status.eq_ignore_ascii_case("ok"));
    }
    if let Some(ok) = value.get("ok").and_then(Value::as_bool) {
        return !ok;
    }
    false
}

/// The object holding file fields: a nested payload when present, otherwise
/// the top-level response itself.
fn payload_object(value: &Value) -> &Value {
    for key in ["data", "result", "file", "📜 Extracted Info"] {
        if let Some(inner) = value.get(key) {
            if inner.is_object() {
                return inner;
            }
            // Some revisions wrap the payload in a one-element array.
            if let Some(first) = inner.as_array().and_then(|a| a.first()) {
                if first.is_object() {
                    return first;
                }
            }
        }
    }
    value
}

fn first_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(k))
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_str_units() {
        assert_eq!(parse_size_str("15 MB"), 15 * 1024 * 1024);
        assert_eq!(parse_size_str("1.5KB"), 1536);
        assert_eq!(parse_size_str("2 GB"), 2 * 1024_u64.pow(3));
        assert_eq!(parse_size_str("1 TB"), 1024_u64.pow(4));
        assert_eq!(parse_size_str("123"), 123);
        assert_eq!(parse_size_str("42 B"), 42);
    }

    #[test]
    fn test_parse_size_str_garbage_is_zero() {
        assert_eq!(parse_size_str(""), 0);
        assert_eq!(parse_size_str("huge"), 0);
        assert_eq!(parse_size_str("12 parsecs"), 0);
        assert_eq!(parse_size_str("-5 MB"), 0);
        assert_eq!(parse_size_str("NaN MB"), 0);
    }

    #[test]
    fn test_parse_response_legacy_shape() {
        let body = serde_json::json!({
            "success": true,
            "data": {
                "filename": "movie.mkv",
                "link": "https://host/f",
                "size": "15 MB"
            }
        });
        let d = parse_resolver_response(&body).expect("descriptor");
        assert_eq!(d.filename, "movie.mkv");
        assert_eq!(d.direct_url, "https://host/f");
        assert_eq!(d.size_bytes, 15 * 1024 * 1024);
    }

    #[test]
    fn test_parse_response_drifted_shape() {
        // Newer provider revision: different status flag, keys and numeric size
        let body = serde_json::json!({
            "status": "Success",
            "📜 Extracted Info": [{
                "title": "archive.zip",
                "Direct Download Link": "https://cdn/abc",
                "size": 1048576
            }]
        });
        let d = parse_resolver_response(&body).expect("descriptor");
        assert_eq!(d.filename, "archive.zip");
        assert_eq!(d.direct_url, "https://cdn/abc");
        assert_eq!(d.size_bytes, 1_048_576);
    }

    #[test]
    fn test_parse_response_missing_filename_gets_placeholder() {
        let body = serde_json::json!({
            "success": true,
            "data": { "link": "https://host/f" }
        });
        let d = parse_resolver_response(&body).expect("descriptor");
        assert_eq!(d.filename, UNNAMED_FILE);
        assert_eq!(d.size_bytes, 0);
    }

    #[test]
    fn test_parse_response_rejection_carries_detail() {
        let body = serde_json::json!({
            "success": false,
            "message": "file not found"
        });
        let err = parse_resolver_response(&body).expect_err("rejection");
        match err {
            ResolveError::UpstreamRejected(detail) => assert_eq!(detail, "file not found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_response_no_link_is_rejection() {
        let body = serde_json::json!({ "success": true, "data": {} });
        assert!(matches!(
            parse_resolver_response(&body),
            Err(ResolveError::UpstreamRejected(_))
        ));
    }
}
