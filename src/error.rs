//! Error types for kubeaccess
//!
//! Every failure on a request path ends up here and is turned into a
//! request-scoped JSON response. Nothing on a request path terminates the
//! process.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::pki::PkiError;

/// Main error type for kubeaccess operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or semantically invalid request input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending request field, if known
        field: Option<String>,
    },

    /// The named resource does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "RoleBinding")
        kind: String,
        /// Resource name, namespace-qualified where scoped
        name: String,
    },

    /// A resource with that name already exists
    #[error("{kind} {name} already exists")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Resource name, namespace-qualified where scoped
        name: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Certificate issuance error
    #[error("certificate issuance failed: {source}")]
    Pki {
        /// The underlying pipeline error
        #[from]
        source: PkiError,
    },

    /// A collaborator call did not complete within its bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being attempted
        operation: String,
        /// The bound that elapsed
        after: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error tied to a request field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Kube { source } => match source {
                // The object the caller supplied was refused (bad rules, subjects, namespace)
                kube::Error::Api(ae) if matches!(ae.code, 400 | 404 | 422) => {
                    StatusCode::BAD_REQUEST
                }
                // Everything else, including 401/403 for our own service account
                _ => StatusCode::BAD_GATEWAY,
            },
            Error::Pki { source } => source.status_code(),
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "request rejected");
        }

        let body = serde_json::json!({
            "ok": false,
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Error::validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            Error::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::not_found("Role", "default/viewer").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::conflict("ClusterRole", "viewer").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::from(api_error(422)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::from(api_error(400)).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn collaborator_errors_map_to_5xx() {
        assert_eq!(
            Error::from(api_error(503)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        // Our service account lacking permissions is not the caller's fault
        for code in [401, 403, 429] {
            assert_eq!(
                Error::from(api_error(code)).status_code(),
                StatusCode::BAD_GATEWAY,
                "code {code}"
            );
        }
        assert_eq!(
            Error::timeout("list ClusterRoles", Duration::from_secs(30)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::internal_with_context("server", "oops").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::not_found("RoleBinding", "team-a/readers");
        assert_eq!(err.to_string(), "RoleBinding team-a/readers not found");

        let err = Error::validation_for_field("roleKind", "must be Role or ClusterRole");
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("roleKind")),
            _ => panic!("Expected Validation variant"),
        }
        assert!(err.to_string().contains("must be Role or ClusterRole"));
    }

    #[tokio::test]
    async fn response_body_reports_not_ok() {
        let response = Error::not_found("ClusterRole", "ghost").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "ClusterRole ghost not found");
    }
}
