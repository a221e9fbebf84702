use thiserror::Error;

use crate::base_query::BaseQueryFailure;
use crate::cache::{Data, Rejection};
use crate::endpoints::EndpointKind;

/// Errors returned synchronously by [`crate::Api`] operations.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown endpoint `{0}`")]
    UnknownEndpoint(String),
    #[error("endpoint `{name}` is a {actual}, expected a {expected}")]
    WrongEndpointKind {
        name: String,
        expected: EndpointKind,
        actual: EndpointKind,
    },
    #[error("endpoint `{0}` is already defined")]
    EndpointExists(String),
    #[error("an api must be built inside a Tokio runtime")]
    NoRuntime,
}

impl ApiError {
    pub fn unknown_endpoint(name: impl Into<String>) -> Self {
        Self::UnknownEndpoint(name.into())
    }
}

/// Outcome of unwrapping a settled request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    /// The base query returned an error value.
    #[error("request rejected: {error}")]
    Rejected { error: Data },
    #[error("request aborted")]
    Aborted,
    /// The transport failed, or the response failed validation unconverted.
    #[error("unhandled failure: {0}")]
    Unhandled(BaseQueryFailure),
    #[error("no result for `{0}`")]
    Uninitialized(String),
}

impl QueryError {
    /// Classify a stored error payload from an entry that did not say how it
    /// was rejected.
    pub fn from_error_data(error: Data) -> Self {
        let aborted = error.get("name").and_then(Data::as_str) == Some(ABORT_ERROR_NAME);
        if aborted {
            Self::Aborted
        } else {
            Self::Rejected { error }
        }
    }
}

impl From<&Rejection> for QueryError {
    fn from(rejection: &Rejection) -> Self {
        if rejection.aborted {
            return Self::Aborted;
        }
        if rejection.rejected_with_value {
            return Self::Rejected {
                error: rejection.error.clone(),
            };
        }
        let field = |key: &str| {
            rejection
                .error
                .get(key)
                .and_then(Data::as_str)
                .map(str::to_string)
        };
        Self::Unhandled(BaseQueryFailure {
            name: field("name").unwrap_or_else(|| "Error".to_string()),
            message: field("message").unwrap_or_default(),
        })
    }
}

pub(crate) const ABORT_ERROR_NAME: &str = "AbortError";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry initialization failed: {0}")]
    Init(String),
}

impl TelemetryError {
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }
}
