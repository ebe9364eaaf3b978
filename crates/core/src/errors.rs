use thiserror::Error;

use crate::domain::operation::ParamKey;
use crate::domain::session::SessionId;
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("invalid {}: {reason}", key.label())]
    InvalidParameter { key: ParamKey, reason: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure of a calendar operation as seen by the conversation layer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("{resource} was not found")]
    NotFound { resource: String },
    #[error("conflict: {detail}")]
    Conflict { detail: String },
    #[error("calendar credentials were rejected")]
    Unauthorized,
    #[error("transient failure: {detail}")]
    Transient { detail: String, outcome_unknown: bool },
    #[error("invalid parameters: {}", problems.join("; "))]
    InvalidParameters { problems: Vec<String> },
}

impl ToolError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient { detail: detail.into(), outcome_unknown: false }
    }

    pub fn invalid(problem: impl Into<String>) -> Self {
        Self::InvalidParameters { problems: vec![problem.into()] }
    }

    /// Fatal errors end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::Transient { .. } => "transient",
            Self::InvalidParameters { .. } => "invalid_parameters",
        }
    }
}

impl From<DomainError> for ToolError {
    fn from(value: DomainError) -> Self {
        Self::invalid(value.to_string())
    }
}

/// The only failures that escape a conversational turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("session {session_id} ended: calendar credentials were rejected")]
    Unauthorized { session_id: SessionId },
}

impl TurnError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        match self {
            Self::Unauthorized { .. } => InterfaceError::Unauthorized {
                message: self.to_string(),
                correlation_id: correlation_id.into(),
            },
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => {
                "The calendar rejected the configured API key. Update CAL_API_KEY and start a new conversation."
            }
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::operation::ParamKey;
    use crate::domain::session::SessionId;
    use crate::errors::{DomainError, InterfaceError, ToolError, TurnError};

    #[test]
    fn turn_error_maps_to_unauthorized_interface_error() {
        let interface = TurnError::Unauthorized { session_id: SessionId::from("sess-1") }
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Unauthorized {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert!(interface.user_message().contains("CAL_API_KEY"));
        assert_eq!(interface.correlation_id(), "req-1");
    }

    #[test]
    fn only_unauthorized_is_fatal() {
        assert!(ToolError::Unauthorized.is_fatal());
        assert!(!ToolError::transient("timeout").is_fatal());
        assert!(!ToolError::Conflict { detail: "slot taken".to_owned() }.is_fatal());
        assert!(ToolError::transient("timeout").is_transient());
    }

    #[test]
    fn domain_error_becomes_invalid_parameters() {
        let error = ToolError::from(DomainError::InvalidParameter {
            key: ParamKey::AttendeeEmail,
            reason: "must contain @".to_owned(),
        });

        assert_eq!(
            error,
            ToolError::InvalidParameters {
                problems: vec!["invalid attendee email: must contain @".to_owned()]
            }
        );
        assert_eq!(error.kind_label(), "invalid_parameters");
    }
}
