//! Response and transport error types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Values above this are read as UNIX timestamps rather than deltas.
const EPOCH_THRESHOLD_SECS: f64 = 1_000_000_000.0;

/// Errors produced while sending a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Connectivity failure (DNS, refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// No response within the transport timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        /// Server-mandated wait, from `Retry-After` or a rate-limit reset header.
        retry_after: Option<Duration>,
        body: String,
    },

    /// The request could not be built (bad method, URL, header).
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RequestError::Timeout
        } else if e.is_builder() {
            RequestError::Invalid(e.to_string())
        } else {
            RequestError::Network(e.to_string())
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Server-mandated wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(&self.headers)
    }

    /// Turn a non-2xx response into `RequestError::Status`.
    pub fn error_for_status(self, url: &str) -> Result<Self, RequestError> {
        if self.is_success() {
            return Ok(self);
        }
        let retry_after = self.retry_after();
        Err(RequestError::Status {
            status: self.status,
            url: url.to_string(),
            retry_after,
            body: self.body,
        })
    }
}

/// Read `Retry-After`, falling back to rate-limit reset headers.
///
/// Only numeric forms are understood. Large values are treated as UNIX
/// timestamps and converted to a delay from now.
pub fn parse_retry_after(headers: &BTreeMap<String, String>) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset", "ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|value| parse_delay_value(value))
}

fn parse_delay_value(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    if secs >= EPOCH_THRESHOLD_SECS {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        return Duration::try_from_secs_f64((secs - now).max(0.0)).ok();
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(
            parse_retry_after(&headers(&[("retry-after", "2")])),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            parse_retry_after(&headers(&[("retry-after", "0.5")])),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_retry_after_unparseable() {
        assert_eq!(
            parse_retry_after(&headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")])),
            None
        );
        assert_eq!(parse_retry_after(&headers(&[("retry-after", "-3")])), None);
        assert_eq!(parse_retry_after(&BTreeMap::new()), None);
    }

    #[test]
    fn test_rate_limit_reset_epoch() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let reset = (now + 30).to_string();
        let delay = parse_retry_after(&headers(&[("x-ratelimit-reset", &reset)])).unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(28));

        let past = (now - 30).to_string();
        assert_eq!(
            parse_retry_after(&headers(&[("ratelimit-reset", &past)])),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_out_of_range_values_are_ignored() {
        let huge = "99999999999999999999";
        assert_eq!(parse_retry_after(&headers(&[("retry-after", huge)])), None);
        assert_eq!(parse_retry_after(&headers(&[("ratelimit-reset", "1e300")])), None);
        assert_eq!(
            parse_retry_after(&headers(&[("retry-after", huge), ("x-ratelimit-reset", "4")])),
            Some(Duration::from_secs(4))
        );

        let mut response = HttpResponse::new(429);
        response.headers.insert("retry-after".into(), huge.into());
        let err = response.error_for_status("http://api/orders").unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert!(matches!(err, RequestError::Status { retry_after: None, .. }));
    }

    #[test]
    fn test_error_for_status() {
        let mut response = HttpResponse::new(429);
        response.headers.insert("retry-after".into(), "2".into());
        let err = response.error_for_status("http://api/orders").unwrap_err();
        assert_eq!(
            err,
            RequestError::Status {
                status: 429,
                url: "http://api/orders".into(),
                retry_after: Some(Duration::from_secs(2)),
                body: String::new(),
            }
        );

        assert!(HttpResponse::new(204).error_for_status("http://api/").is_ok());
    }
}
