//! Failure taxonomy of the procedure pipeline and its mapping onto
//! response statuses and payloads.

use serde_json::{json, Value};
use sy_domain::FieldError;
use sy_protocol::{STATUS_BAD_REQUEST, STATUS_INTERNAL, STATUS_NOT_FOUND};

/// Errors raised by middleware, validation, or resolvers.
///
/// Everything except [`ProcedureError::Internal`] is "classified": it
/// carries the status and payload the caller will see.  Internal errors
/// expose their message only.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ProcedureError {
    /// Input or params failed schema validation (400).
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    /// No route matched the requested path (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Raised intentionally with an explicit status, e.g. 401 from an
    /// authentication middleware.
    #[error("{message}")]
    Classified {
        status: u16,
        message: String,
        data: Option<Value>,
    },

    /// Anything unexpected (500).
    #[error("{0}")]
    Internal(String),
}

impl ProcedureError {
    pub fn classified(status: u16, message: impl Into<String>) -> Self {
        Self::Classified {
            status,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a payload to a classified error.  Other variants are
    /// returned unchanged.
    pub fn with_data(self, data: Value) -> Self {
        match self {
            Self::Classified {
                status, message, ..
            } => Self::Classified {
                status,
                message,
                data: Some(data),
            },
            other => other,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub(crate) fn invalid(message: &str, errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => STATUS_BAD_REQUEST,
            Self::NotFound(_) => STATUS_NOT_FOUND,
            Self::Classified { status, .. } => *status,
            Self::Internal(_) => STATUS_INTERNAL,
        }
    }

    /// Payload sent to the caller.
    pub fn to_data(&self) -> Value {
        match self {
            Self::Validation { message, errors } => json!({
                "message": message,
                "details": errors,
            }),
            Self::NotFound(_) => json!({ "message": "Not found" }),
            Self::Classified { message, data, .. } => json!({
                "message": message,
                "details": data.clone().unwrap_or(Value::Null),
            }),
            Self::Internal(message) => json!({ "message": message }),
        }
    }
}

impl From<serde_json::Error> for ProcedureError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ProcedureError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_with_details() {
        let err = ProcedureError::invalid(
            "Error validating input",
            vec![FieldError::new(["name"], "Required")],
        );
        assert_eq!(err.status(), 400);
        assert_eq!(
            err.to_data(),
            json!({
                "message": "Error validating input",
                "details": [{"path": ["name"], "message": "Required"}],
            })
        );
    }

    #[test]
    fn classified_keeps_declared_status_and_data() {
        let err = ProcedureError::classified(401, "sign in first").with_data(json!({"realm": "api"}));
        assert_eq!(err.status(), 401);
        assert_eq!(err.to_data()["details"]["realm"], "api");
        assert_eq!(err.to_string(), "sign in first");
    }

    #[test]
    fn internal_exposes_message_only() {
        let err: ProcedureError = anyhow::anyhow!("db down").into();
        assert_eq!(err.status(), 500);
        assert_eq!(err.to_data(), json!({"message": "db down"}));
    }

    #[test]
    fn with_data_ignores_unclassified() {
        let err = ProcedureError::internal("x").with_data(json!(1));
        assert!(matches!(err, ProcedureError::Internal(_)));
    }
}
