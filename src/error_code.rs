//! HTTP status classes for forecast API failures.
//!
//! Every non-success response from the forecast service is tagged with one
//! of these classes. The class name travels inside [`crate::Error::Remote`]
//! so callers can branch on a stable string instead of raw status codes.
//!
//! | Category    | Classes                                                    |
//! |-------------|------------------------------------------------------------|
//! | client      | invalid_request, authentication, permission_denied, ...    |
//! | rate        | rate_limited                                               |
//! | server      | server_error, bad_gateway, overloaded, timeout             |
//! | operational | conflict                                                   |
//! | unknown     | unknown                                                    |
//!
//! ## Example
//!
//! ```rust
//! use timegpt_client::error_code::StatusClass;
//!
//! let class = StatusClass::from_http_status(429);
//! assert_eq!(class.name(), "rate_limited");
//! assert_eq!(class.category(), "rate");
//! assert!(!class.is_credential_failure());
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// 400 / 422: malformed payload or invalid parameters
    InvalidRequest,
    /// 401: invalid, expired, or missing API key
    Authentication,
    /// 403: valid key without access to the requested model
    PermissionDenied,
    /// 404: unknown endpoint or fine-tuned model id
    NotFound,
    /// 413: payload exceeds the service limit
    RequestTooLarge,
    /// 429: request rate limit exceeded
    RateLimited,
    /// 500
    ServerError,
    /// 502
    BadGateway,
    /// 503 / 529
    Overloaded,
    /// 408 / 504
    Timeout,
    /// 409
    Conflict,
    Unknown,
}

impl StatusClass {
    /// Returns the standard name (e.g., `"rate_limited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::BadGateway => "bad_gateway",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the category: `"client"`, `"rate"`, `"server"`, `"operational"`, or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest
            | Self::Authentication
            | Self::PermissionDenied
            | Self::NotFound
            | Self::RequestTooLarge => "client",
            Self::RateLimited => "rate",
            Self::ServerError | Self::BadGateway | Self::Overloaded | Self::Timeout => "server",
            Self::Conflict => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Credential failures are never worth another attempt.
    #[inline]
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Authentication | Self::PermissionDenied)
    }

    /// Maps an HTTP status code to its class.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            409 => Self::Conflict,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            500 => Self::ServerError,
            502 => Self::BadGateway,
            503 | 529 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
