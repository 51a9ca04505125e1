//! HTTP status and transport error classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};

use crate::errors::OperationError;

/// Longest response body quoted in an error message.
const MAX_DETAIL_LEN: usize = 200;

impl OperationError {
    /// Classify a non-success HTTP status.
    ///
    /// | Status | Class |
    /// |--------|-------|
    /// | 429 | `RateLimited` (with the `Retry-After` hint) |
    /// | 400, 401, 403, 404, 405, 422 and other 4xx | `Fatal` |
    /// | 408, 5xx | `Transient` |
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, detail: &str) -> Self {
        let message = if detail.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {} - {}", status, truncate(detail))
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Self::RateLimited {
                message,
                retry_after,
            };
        }

        if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
            return Self::Transient(message);
        }

        if status.is_client_error() {
            return Self::Fatal(message);
        }

        // 1xx/3xx reaching the caller means the provider misbehaved.
        Self::Transient(message)
    }

    /// Classify a `reqwest` failure.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Transient(format!("Request timed out: {}", error));
        }
        if error.is_connect() {
            return Self::Transient(format!("Connection failed: {}", error));
        }
        if let Some(status) = error.status() {
            return Self::from_status(status, None, "");
        }
        if error.is_builder() {
            return Self::Fatal(format!("Invalid request: {}", error));
        }
        if error.is_decode() {
            return Self::Transient(format!("Malformed response: {}", error));
        }

        Self::Transient(format!("Request failed: {}", error))
    }
}

fn truncate(detail: &str) -> &str {
    match detail.char_indices().nth(MAX_DETAIL_LEN) {
        Some((index, _)) => &detail[..index],
        None => detail,
    }
}

/// Pass a successful response through, classify anything else.
pub async fn check_response(response: Response) -> Result<Response, OperationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    debug!("HTTP {} from provider: {}", status, truncate(&body));

    Err(OperationError::from_status(status, retry_after, body.trim()))
}

/// Read the `Retry-After` header as a duration from now.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after_value(value, Utc::now())
}

/// Parse a `Retry-After` value: delay seconds or an HTTP date.
///
/// Dates in the past yield a zero duration.
pub fn parse_retry_after_value(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some(
        at.signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureClass;
    use chrono::TimeZone;

    #[test]
    fn test_too_many_requests_is_rate_limited() {
        let error = OperationError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            "slow down",
        );
        assert_eq!(error.class(), FailureClass::RateLimited);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(
            error.to_string(),
            "Rate limited: HTTP 429 Too Many Requests - slow down"
        );
    }

    #[test]
    fn test_client_errors_are_fatal() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::METHOD_NOT_ALLOWED,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert_eq!(
                OperationError::from_status(status, None, "").class(),
                FailureClass::Fatal,
                "{}",
                status
            );
        }
    }

    #[test]
    fn test_server_errors_and_timeouts_are_transient() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert_eq!(
                OperationError::from_status(status, None, "").class(),
                FailureClass::Transient,
                "{}",
                status
            );
        }
    }

    #[test]
    fn test_long_detail_is_truncated() {
        let body = "x".repeat(1_000);
        let error = OperationError::from_status(StatusCode::BAD_GATEWAY, None, &body);
        assert!(error.to_string().len() < 300);
    }

    #[test]
    fn test_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(
            parse_retry_after_value("120", now),
            Some(Duration::from_secs(120))
        );
        assert_eq!(parse_retry_after_value(" 3 ", now), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
        assert_eq!(
            parse_retry_after_value("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(60))
        );
        // Already passed
        assert_eq!(
            parse_retry_after_value("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_retry_after_garbage() {
        assert_eq!(parse_retry_after_value("soon", Utc::now()), None);

        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "15".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(15)));
    }
}
