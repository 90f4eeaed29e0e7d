use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Series or column that caused the error (e.g., "series[id1].ds", "options.horizon")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "request_builder", "reconciler")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the forecast client.
///
/// The first six variants form the call-level taxonomy; the rest are the
/// low-level causes they usually wrap.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Dispatch error on batch {batch}: {source}")]
    Dispatch { batch: usize, source: Box<Error> },

    #[error("Retry budget exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("Response format error: {message}{}", format_context(.context))]
    ResponseFormat {
        message: String,
        context: ErrorContext,
    },

    #[error("Incomplete result: no forecast returned for series {missing:?}")]
    IncompleteResult { missing: Vec<String> },

    #[error("Forecast call timed out after {}ms", .limit.as_millis())]
    Timeout { limit: Duration },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote error: HTTP {status} ({class}): {message}")]
    Remote {
        status: u16,
        class: String,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new response format error with structured context
    pub fn response_format_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::ResponseFormat {
            message: msg.into(),
            context,
        }
    }

    pub(crate) fn dispatch(batch: usize, source: Error) -> Self {
        Error::Dispatch {
            batch,
            source: Box::new(source),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. }
            | Error::ResponseFormat { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Follow `Dispatch` wrappers down to the batch-level cause.
    pub fn root(&self) -> &Error {
        match self {
            Error::Dispatch { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status of the remote failure behind this error, if any.
    ///
    /// Looks through `Dispatch` and `RetryExhausted` wrappers.
    pub fn http_status(&self) -> Option<u16> {
        match self.root() {
            Error::Remote { status, .. } => Some(*status),
            Error::RetryExhausted { last, .. } => last.http_status(),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self.root(), Error::RetryExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rendered_in_message() {
        let err = Error::validation_with_context(
            "target contains missing values",
            ErrorContext::new()
                .with_field_path("series[id1].y")
                .with_source("request_builder"),
        );
        let msg = err.to_string();
        assert!(msg.contains("series[id1].y"));
        assert!(msg.contains("request_builder"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_root_and_status_look_through_wrappers() {
        let remote = Error::Remote {
            status: 429,
            class: "rate_limited".into(),
            message: "slow down".into(),
            retry_after_ms: None,
        };
        let exhausted = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(remote),
        };
        let err = Error::dispatch(1, exhausted);

        assert!(err.is_retry_exhausted());
        assert_eq!(err.http_status(), Some(429));
        assert!(err.to_string().starts_with("Dispatch error on batch 1"));
    }
}
