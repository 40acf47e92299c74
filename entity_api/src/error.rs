//! Error types for the HTTP collaborators
use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;

/// Errors while calling the remote API.
/// The intent is to categorize errors into two major types:
///  * Errors the server answered with. Ex EntityApiErrorKind::RecordNotFound
///  * Errors reaching the server at all. Ex EntityApiErrorKind::Network
#[derive(Debug)]
pub struct Error {
    // Underlying error emitted from reqwest or serde internals
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    // Enum representing which category of error
    pub error_kind: EntityApiErrorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EntityApiErrorKind {
    // The server rejected the bearer token (401)
    RecordUnauthenticated,
    // Record not found (404)
    RecordNotFound,
    // Any other non-success status, with the server's message when it sent one
    Status { code: u16, message: Option<String> },
    // The response body did not match the expected shape
    InvalidResponse,
    // Connection refused, timeout, TLS and similar transport failures
    Network,
    // The request could not be built. Ex an invalid header value
    SystemError,
}

impl Error {
    pub fn new(error_kind: EntityApiErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            EntityApiErrorKind::RecordUnauthenticated => write!(f, "Not authenticated"),
            EntityApiErrorKind::RecordNotFound => write!(f, "Record not found"),
            EntityApiErrorKind::Status {
                message: Some(message),
                ..
            } => write!(f, "{message}"),
            EntityApiErrorKind::Status {
                code,
                message: None,
            } => write!(f, "Request failed with status {code}"),
            EntityApiErrorKind::InvalidResponse => write!(f, "Unexpected response from server"),
            EntityApiErrorKind::Network => match &self.source {
                Some(source) => write!(f, "Network error: {source}"),
                None => write!(f, "Network error"),
            },
            EntityApiErrorKind::SystemError => write!(f, "Failed to build request"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            EntityApiErrorKind::SystemError
        } else if err.is_decode() {
            EntityApiErrorKind::InvalidResponse
        } else {
            EntityApiErrorKind::Network
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: EntityApiErrorKind::InvalidResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_prefers_server_message() {
        let err = Error::new(EntityApiErrorKind::Status {
            code: 409,
            message: Some("Email already registered".to_string()),
        });
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[test]
    fn status_error_without_message_reports_code() {
        let err = Error::new(EntityApiErrorKind::Status {
            code: 502,
            message: None,
        });
        assert_eq!(err.to_string(), "Request failed with status 502");
    }

    #[test]
    fn json_errors_map_to_invalid_response() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.error_kind, EntityApiErrorKind::InvalidResponse);
        assert!(err.source().is_some());
    }
}
