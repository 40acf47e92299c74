//! Error types for the `domain` layer.
use entity_api::error::{EntityApiErrorKind, Error as EntityApiError};
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure with
/// `domain::error::Error` as the root holding a tree of `error_kind` enums for
/// the kinds of errors that can occur here or in lower layers. `source` keeps the
/// original error. Callers above `domain` (the store, the runner) never match on
/// `entity_api` errors directly.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Enum representing the various kinds of internal errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    /// Input rejected before any request was made, with every problem found.
    Validation(Vec<String>),
    Entity(EntityErrorKind),
    Config,
    Other(String),
}

/// Errors bubbling up from `entity_api`, reduced to what the domain cares about.
#[derive(Debug, PartialEq)]
pub enum EntityErrorKind {
    NotFound,
    Unauthenticated,
    /// The server refused the request. Carries the message it sent, if any.
    Rejected(Option<String>),
    Invalid,
    Other(String),
}

/// Enum representing the various kinds of external errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Network,
    Other(String),
}

impl Error {
    pub fn validation(errors: Vec<String>) -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Validation(errors)),
        }
    }

    /// Validation problems, when this is a validation error.
    pub fn validation_errors(&self) -> Option<&[String]> {
        match &self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::Validation(errors)) => Some(errors),
            _ => None,
        }
    }
}

// The store shows this text to the user, so it stays human readable.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::Validation(errors)) => {
                write!(f, "Validation failed: {}", errors.join(", "))
            }
            DomainErrorKind::Internal(InternalErrorKind::Entity(kind)) => match kind {
                EntityErrorKind::NotFound => write!(f, "User not found"),
                EntityErrorKind::Unauthenticated => write!(f, "Not authenticated"),
                EntityErrorKind::Rejected(Some(message)) => write!(f, "{message}"),
                EntityErrorKind::Rejected(None) => write!(f, "Request rejected by server"),
                EntityErrorKind::Invalid => write!(f, "Unexpected response from server"),
                EntityErrorKind::Other(message) => write!(f, "{message}"),
            },
            DomainErrorKind::Internal(InternalErrorKind::Config) => {
                write!(f, "Invalid configuration")
            }
            DomainErrorKind::Internal(InternalErrorKind::Other(message)) => write!(f, "{message}"),
            DomainErrorKind::External(ExternalErrorKind::Network) => match &self.source {
                Some(source) => write!(f, "{source}"),
                None => write!(f, "Network error"),
            },
            DomainErrorKind::External(ExternalErrorKind::Other(message)) => write!(f, "{message}"),
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

// This is where we translate errors from the `entity_api` layer to the `domain` layer.
impl From<EntityApiError> for Error {
    fn from(err: EntityApiError) -> Self {
        let error_kind = match &err.error_kind {
            EntityApiErrorKind::RecordNotFound => {
                DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::NotFound))
            }
            EntityApiErrorKind::RecordUnauthenticated => DomainErrorKind::Internal(
                InternalErrorKind::Entity(EntityErrorKind::Unauthenticated),
            ),
            EntityApiErrorKind::Status { message, .. } => DomainErrorKind::Internal(
                InternalErrorKind::Entity(EntityErrorKind::Rejected(message.clone())),
            ),
            EntityApiErrorKind::InvalidResponse => {
                DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::Invalid))
            }
            EntityApiErrorKind::Network => DomainErrorKind::External(ExternalErrorKind::Network),
            EntityApiErrorKind::SystemError => {
                DomainErrorKind::Internal(InternalErrorKind::Other(err.to_string()))
            }
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(format!(
                "State file error: {err}"
            ))),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(format!(
                "Invalid state file: {err}"
            ))),
            source: Some(Box::new(err)),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_is_shown_verbatim() {
        let err: Error = EntityApiError::new(EntityApiErrorKind::Status {
            code: 409,
            message: Some("Email already registered".to_string()),
        })
        .into();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::Rejected(
                Some("Email already registered".to_string())
            )))
        );
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[test]
    fn missing_record_maps_to_not_found() {
        let err: Error = EntityApiError::new(EntityApiErrorKind::RecordNotFound).into();
        assert_eq!(err.to_string(), "User not found");
        assert!(err.source.is_some());
    }

    #[test]
    fn network_failures_are_external() {
        let err: Error = EntityApiError::new(EntityApiErrorKind::Network).into();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::Network)
        );
    }

    #[test]
    fn validation_lists_every_problem() {
        let err = Error::validation(vec![
            "Name is required".to_string(),
            "Password is required".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: Name is required, Password is required"
        );
        assert_eq!(err.validation_errors().map(<[String]>::len), Some(2));
    }
}
