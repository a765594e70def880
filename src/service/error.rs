//! Remote service error types with transience classification.
//!
//! Distinguishes between transient errors (a retry could succeed) and
//! permanent errors (it could not). The reconciliation engine mostly
//! swallows failures per its documented policy, so the classification
//! is used for logging and for the bulk-delete retry decision.

use std::time::Duration;

/// Error from a remote task service call.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// The kind of error
    pub kind: ServiceErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header), if the server
    /// provided one
    pub retry_after: Option<Duration>,
}

impl ServiceError {
    /// Create a rate limit error.
    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ServiceErrorKind::RateLimited,
            status_code: Some(429),
            message,
            retry_after,
        }
    }

    /// Create a server error.
    pub fn server_error(status_code: u16, message: String) -> Self {
        Self {
            kind: ServiceErrorKind::ServerError,
            status_code: Some(status_code),
            message,
            retry_after: None,
        }
    }

    /// Create a client error (bad request, auth, missing task, etc.).
    pub fn client_error(status_code: u16, message: String) -> Self {
        Self {
            kind: ServiceErrorKind::ClientError,
            status_code: Some(status_code),
            message,
            retry_after: None,
        }
    }

    /// Create a network error.
    pub fn network_error(message: String) -> Self {
        Self {
            kind: ServiceErrorKind::NetworkError,
            status_code: None,
            message,
            retry_after: None,
        }
    }

    /// Create a parse error.
    pub fn parse_error(message: String) -> Self {
        Self {
            kind: ServiceErrorKind::ParseError,
            status_code: None,
            message,
            retry_after: None,
        }
    }

    /// Check if this error is transient.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Classification of remote service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Rate limited (429) - transient
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient
    ServerError,
    /// Client error (400, 401, 403, 404) - permanent
    ClientError,
    /// Network error (connection failed, timeout) - transient
    NetworkError,
    /// Response parsing error - usually permanent
    ParseError,
}

impl ServiceErrorKind {
    /// Check if this error kind is transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceErrorKind::RateLimited
                | ServiceErrorKind::ServerError
                | ServiceErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceErrorKind::RateLimited => write!(f, "Rate limited"),
            ServiceErrorKind::ServerError => write!(f, "Server error"),
            ServiceErrorKind::ClientError => write!(f, "Client error"),
            ServiceErrorKind::NetworkError => write!(f, "Network error"),
            ServiceErrorKind::ParseError => write!(f, "Parse error"),
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> ServiceErrorKind {
    match status {
        429 => ServiceErrorKind::RateLimited,
        500 | 502 | 503 | 504 => ServiceErrorKind::ServerError,
        400..=499 => ServiceErrorKind::ClientError,
        _ => ServiceErrorKind::ServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ServiceErrorKind::RateLimited.is_transient());
        assert!(ServiceErrorKind::ServerError.is_transient());
        assert!(ServiceErrorKind::NetworkError.is_transient());
        assert!(!ServiceErrorKind::ClientError.is_transient());
        assert!(!ServiceErrorKind::ParseError.is_transient());
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), ServiceErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), ServiceErrorKind::ServerError);
        assert_eq!(classify_http_status(503), ServiceErrorKind::ServerError);
        assert_eq!(classify_http_status(400), ServiceErrorKind::ClientError);
        assert_eq!(classify_http_status(404), ServiceErrorKind::ClientError);
        assert_eq!(classify_http_status(600), ServiceErrorKind::ServerError);
    }

    #[test]
    fn test_display_includes_status() {
        let err = ServiceError::client_error(404, "no such task".to_string());
        assert_eq!(err.to_string(), "Client error (HTTP 404): no such task");
    }
}
