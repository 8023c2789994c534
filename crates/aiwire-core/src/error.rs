//! Structured error taxonomy and the HTTP failure classifier.
//!
//! Every failed exchange with the API, streaming or not, ends up as a
//! [`StructuredError`]. The status code is mapped to an [`ErrorKind`] tag,
//! the raw body is kept for diagnostics, and for rate-limited responses the
//! quota headers are extracted into [`RateLimitInfo`].

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Header carrying the request-count quota of the current window.
pub const HEADER_LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
/// Header carrying the token-count quota of the current window.
pub const HEADER_LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
/// Header carrying the requests left in the current window.
pub const HEADER_REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
/// Header carrying the tokens left in the current window.
pub const HEADER_REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
/// Header carrying the time until the request quota resets.
pub const HEADER_RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
/// Header carrying the time until the token quota resets.
pub const HEADER_RESET_TOKENS: &str = "x-ratelimit-reset-tokens";

const HEADER_RETRY_AFTER: &str = "retry-after";

/// Category of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 400: the request was malformed.
    BadRequest,
    /// 401: missing or invalid credentials.
    Unauthorized,
    /// 403: credentials lack access to the resource.
    Forbidden,
    /// 404: the resource does not exist.
    NotFound,
    /// 409: the resource is in a conflicting state.
    Conflict,
    /// 422: the request was well-formed but semantically invalid.
    Unprocessable,
    /// 429: a request or token quota was exhausted.
    RateLimited,
    /// 5xx: the service failed.
    ServerError,
    /// No response was received.
    ConnectionFailure,
    /// No response was received before a deadline.
    Timeout,
    /// Any other non-success status.
    UnexpectedStatus,
}

impl ErrorKind {
    /// Maps an HTTP status code to its category.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::Unprocessable,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::UnexpectedStatus,
        }
    }

    /// Stable snake_case name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unprocessable => "unprocessable",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ConnectionFailure => "connection_failure",
            Self::Timeout => "timeout",
            Self::UnexpectedStatus => "unexpected_status",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota telemetry attached to a rate-limited error.
///
/// Every field is optional: a header that was absent or could not be
/// parsed stays `None` rather than defaulting to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Maximum requests allowed in the window.
    pub limit_requests: Option<u64>,
    /// Maximum tokens allowed in the window.
    pub limit_tokens: Option<u64>,
    /// Requests left in the window.
    pub remaining_requests: Option<u64>,
    /// Tokens left in the window.
    pub remaining_tokens: Option<u64>,
    /// Time until the request quota resets.
    pub reset_requests: Option<Duration>,
    /// Time until the token quota resets.
    pub reset_tokens: Option<Duration>,
    /// Server-suggested wait before retrying (`retry-after`).
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Extracts the quota headers. Never fails.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit_requests: header_u64(headers, HEADER_LIMIT_REQUESTS),
            limit_tokens: header_u64(headers, HEADER_LIMIT_TOKENS),
            remaining_requests: header_u64(headers, HEADER_REMAINING_REQUESTS),
            remaining_tokens: header_u64(headers, HEADER_REMAINING_TOKENS),
            reset_requests: header_duration(headers, HEADER_RESET_REQUESTS),
            reset_tokens: header_duration(headers, HEADER_RESET_TOKENS),
            retry_after: header_duration(headers, HEADER_RETRY_AFTER),
        }
    }

    /// True when no quota field was populated.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Machine-readable error payload returned by the API as
/// `{"error": {"message": ..., "type": ..., "param": ..., "code": ...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Error type tag, e.g. `invalid_request_error`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Request parameter the error refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Error code, string or number on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_code"
    )]
    pub code: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorDetail,
}

fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// A classified failure of an API exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Failure category.
    pub kind: ErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Short description, taken from the inner payload when available.
    pub message: String,
    /// Raw response body, whenever one was received.
    pub body: Option<String>,
    /// Parsed `{"error": {...}}` payload, if the body carried one.
    pub inner: Option<ApiErrorDetail>,
    /// Quota telemetry, only for [`ErrorKind::RateLimited`].
    pub rate_limit: Option<RateLimitInfo>,
}

impl StructuredError {
    /// A failure where no response was received.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::without_response(ErrorKind::ConnectionFailure, message)
    }

    /// A failure where no response was received before a deadline.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::without_response(ErrorKind::Timeout, message)
    }

    fn without_response(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            body: None,
            inner: None,
            rate_limit: None,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::ConnectionFailure
                | ErrorKind::Timeout
        )
    }

    /// Server-suggested wait, falling back to the earliest quota reset.
    pub fn retry_after(&self) -> Option<Duration> {
        let info = self.rate_limit.as_ref()?;
        info.retry_after.or_else(|| {
            match (info.reset_requests, info.reset_tokens) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        })
    }

    /// One-line rendering for logs and terminals.
    pub fn to_display_string(&self) -> String {
        match self.status {
            Some(status) => format!("{} (HTTP {}): {}", self.kind, status, self.message),
            None => format!("{}: {}", self.kind, self.message),
        }
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl std::error::Error for StructuredError {}

/// Classifies a non-success HTTP exchange. Never fails.
pub fn classify(status: u16, headers: &HeaderMap, body: &str) -> StructuredError {
    let kind = ErrorKind::from_status(status);
    let inner = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);

    let message = match &inner {
        Some(detail) if !detail.message.is_empty() => detail.message.clone(),
        _ => http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("request failed")
            .to_string(),
    };

    let rate_limit = (kind == ErrorKind::RateLimited).then(|| RateLimitInfo::from_headers(headers));

    StructuredError {
        kind,
        status: Some(status),
        message,
        body: (!body.is_empty()).then(|| body.to_string()),
        inner,
        rate_limit,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok(s) => Some(s.trim()),
        Err(_) => {
            debug!(header = name, "Ignoring non-ASCII header value");
            None
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = header_str(headers, name)?;
    let parsed = raw.parse().ok();
    if parsed.is_none() {
        debug!(header = name, value = raw, "Ignoring unparseable quota header");
    }
    parsed
}

fn header_duration(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let raw = header_str(headers, name)?;
    let parsed = parse_reset_duration(raw);
    if parsed.is_none() {
        debug!(header = name, value = raw, "Ignoring unparseable reset header");
    }
    parsed
}

/// Parses a quota reset value such as `"1s"`, `"6m0s"`, `"20ms"`,
/// `"1h2m3.5s"`, or a bare number of seconds (`"12"`, `"0.5"`).
pub fn parse_reset_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let mut total = 0f64;
    let mut rest = raw;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let value: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            "us" | "µs" => 0.000_001,
            "ns" => 0.000_000_001,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += value * scale;
    }
    Duration::try_from_secs_f64(total).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_status_table() {
        let cases = [
            (400, ErrorKind::BadRequest),
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (409, ErrorKind::Conflict),
            (422, ErrorKind::Unprocessable),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::ServerError),
            (503, ErrorKind::ServerError),
            (599, ErrorKind::ServerError),
            (418, ErrorKind::UnexpectedStatus),
        ];
        for (status, kind) in cases {
            assert_eq!(ErrorKind::from_status(status), kind, "status {status}");
        }
    }

    #[test]
    fn test_rate_limited_with_only_remaining_requests() {
        let h = headers(&[(HEADER_REMAINING_REQUESTS, "3")]);
        let err = classify(429, &h, "");
        assert_eq!(err.kind, ErrorKind::RateLimited);

        let info = err.rate_limit.unwrap();
        assert_eq!(info.remaining_requests, Some(3));
        assert_eq!(info.limit_requests, None);
        assert_eq!(info.limit_tokens, None);
        assert_eq!(info.remaining_tokens, None);
        assert_eq!(info.reset_requests, None);
        assert_eq!(info.reset_tokens, None);
    }

    #[test]
    fn test_rate_limited_all_headers() {
        let h = headers(&[
            (HEADER_LIMIT_REQUESTS, "60"),
            (HEADER_LIMIT_TOKENS, "150000"),
            (HEADER_REMAINING_REQUESTS, "0"),
            (HEADER_REMAINING_TOKENS, "149984"),
            (HEADER_RESET_REQUESTS, "1s"),
            (HEADER_RESET_TOKENS, "6m0s"),
        ]);
        let info = classify(429, &h, "{}").rate_limit.unwrap();
        assert_eq!(info.limit_requests, Some(60));
        assert_eq!(info.limit_tokens, Some(150_000));
        assert_eq!(info.remaining_requests, Some(0));
        assert_eq!(info.remaining_tokens, Some(149_984));
        assert_eq!(info.reset_requests, Some(Duration::from_secs(1)));
        assert_eq!(info.reset_tokens, Some(Duration::from_secs(360)));
    }

    #[test]
    fn test_unparseable_quota_headers_are_omitted() {
        let h = headers(&[
            (HEADER_LIMIT_REQUESTS, "lots"),
            (HEADER_RESET_TOKENS, "soon"),
            (HEADER_REMAINING_TOKENS, "12"),
        ]);
        let info = classify(429, &h, "").rate_limit.unwrap();
        assert_eq!(info.limit_requests, None);
        assert_eq!(info.reset_tokens, None);
        assert_eq!(info.remaining_tokens, Some(12));
    }

    #[test]
    fn test_quota_headers_ignored_outside_rate_limit() {
        let h = headers(&[(HEADER_REMAINING_REQUESTS, "0")]);
        let err = classify(500, &h, "upstream exploded");
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert!(err.rate_limit.is_none());
        assert_eq!(err.body.as_deref(), Some("upstream exploded"));
        assert_eq!(err.message, "Internal Server Error");
    }

    #[test]
    fn test_inner_payload_is_parsed() {
        let body = r#"{"error":{"message":"Invalid model","type":"invalid_request_error","param":"model","code":"model_not_found"}}"#;
        let err = classify(404, &HeaderMap::new(), body);
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Invalid model");
        assert_eq!(err.body.as_deref(), Some(body));

        let inner = err.inner.unwrap();
        assert_eq!(inner.kind.as_deref(), Some("invalid_request_error"));
        assert_eq!(inner.param.as_deref(), Some("model"));
        assert_eq!(inner.code.as_deref(), Some("model_not_found"));
    }

    #[test]
    fn test_numeric_error_code() {
        let body = r#"{"error":{"message":"nope","code":1234}}"#;
        let inner = classify(400, &HeaderMap::new(), body).inner.unwrap();
        assert_eq!(inner.code.as_deref(), Some("1234"));
    }

    #[test]
    fn test_non_json_body_keeps_raw_text() {
        let err = classify(502, &HeaderMap::new(), "<html>bad gateway</html>");
        assert!(err.inner.is_none());
        assert_eq!(err.body.as_deref(), Some("<html>bad gateway</html>"));
        assert_eq!(err.message, "Bad Gateway");
    }

    #[test]
    fn test_reset_duration_formats() {
        assert_eq!(parse_reset_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_reset_duration("20ms"), Some(Duration::from_millis(20)));
        assert_eq!(parse_reset_duration("6m0s"), Some(Duration::from_secs(360)));
        assert_eq!(
            parse_reset_duration("1h2m3.5s"),
            Some(Duration::from_millis(3_723_500))
        );
        assert_eq!(parse_reset_duration("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_reset_duration(""), None);
        assert_eq!(parse_reset_duration("3x"), None);
        assert_eq!(parse_reset_duration("m"), None);
        assert_eq!(parse_reset_duration("-1"), None);
    }

    #[test]
    fn test_retryable_and_retry_after() {
        let h = headers(&[(HEADER_RESET_REQUESTS, "2s"), (HEADER_RESET_TOKENS, "500ms")]);
        let err = classify(429, &h, "");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(500)));

        let h = headers(&[("retry-after", "7"), (HEADER_RESET_TOKENS, "500ms")]);
        assert_eq!(classify(429, &h, "").retry_after(), Some(Duration::from_secs(7)));

        assert!(!classify(400, &HeaderMap::new(), "").is_retryable());
        assert!(StructuredError::timeout("deadline").is_retryable());
        assert!(StructuredError::connection("refused").is_retryable());
    }

    #[test]
    fn test_display_string() {
        let err = classify(401, &HeaderMap::new(), "");
        assert_eq!(err.to_display_string(), "unauthorized (HTTP 401): Unauthorized");
        assert_eq!(err.to_string(), err.to_display_string());

        let err = StructuredError::timeout("no response within 30s");
        assert_eq!(err.to_display_string(), "timeout: no response within 30s");
        assert_eq!(err.status, None);
    }
}
