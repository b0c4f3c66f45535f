use crate::cache::Fingerprint;
use crate::transport::TransportError;
use thiserror::Error;

/// Unified error type for cache operations.
///
/// This aggregates transport-level and cache-level failures into actionable,
/// high-level categories. Errors delivered to subscribers use [`FetchError`]
/// instead, which is `Clone` so a single failure can fan out to every
/// subscriber of the failed entry.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cannot invalidate in-flight entry {0}: wait for settlement or abort first")]
    InvalidatePending(Fingerprint),

    #[error("Invalid request URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error delivered to subscribers when a fetch settles as Failed.
///
/// Normalizes transport failures, non-success HTTP statuses and payload
/// decoding failures into one shape. Cached alongside successful values:
/// a later subscribe for the same fingerprint replays the failure until
/// the entry is invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or connection failure reported by the transport.
    #[error("Transport failure: {message}")]
    Transport { message: String },

    /// The server answered with a non-2xx status code.
    #[error("HTTP status {status}")]
    HttpStatus { status: u16, body: Option<String> },

    /// The payload did not parse as the expected type.
    #[error("Decode failure: {message}")]
    Decode { message: String },

    /// The in-flight operation was aborted before settlement.
    #[error("Fetch aborted before settlement")]
    Aborted,
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Aborted => FetchError::Aborted,
            TransportError::Http(e) => FetchError::Transport {
                message: e.to_string(),
            },
            TransportError::Other(message) => FetchError::Transport { message },
        }
    }
}

impl FetchError {
    /// Status code, when the failure was a non-success HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_normalization() {
        let err = FetchError::from(TransportError::Other("connection reset".into()));
        assert_eq!(
            err,
            FetchError::Transport {
                message: "connection reset".into()
            }
        );
        assert_eq!(FetchError::from(TransportError::Aborted), FetchError::Aborted);
    }

    #[test]
    fn test_status_accessor() {
        let err = FetchError::HttpStatus {
            status: 404,
            body: None,
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(FetchError::Aborted.status(), None);
    }
}
