//! Client-facing error taxonomy and the JSON response envelope.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    core::{load_balancer::LoadBalancerError, registry::RegistryError},
    ports::identity::IdentityError,
};

/// Message returned for every 500; details only go to the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Every failure the gateway reports to a client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    Unavailable(String),

    /// Detail is logged, never sent
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text placed in the envelope's `error` field.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal error");
        }
        error_response(self.status(), self.client_message())
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::NotFound("Service not found".to_string()),
            RegistryError::Inactive(_) => Self::Unavailable("Service is inactive".to_string()),
            RegistryError::InvalidUrl(msg) => Self::Validation(msg),
        }
    }
}

impl From<LoadBalancerError> for GatewayError {
    fn from(err: LoadBalancerError) -> Self {
        match err {
            LoadBalancerError::NoInstances(_) => {
                Self::Unavailable("No instances available".to_string())
            }
        }
    }
}

impl From<IdentityError> for GatewayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Validation(msg) => Self::Validation(msg),
            IdentityError::Conflict(msg) => Self::Conflict(msg),
            IdentityError::InvalidCredentials => {
                Self::Unauthorized("Invalid credentials".to_string())
            }
            IdentityError::Inactive => Self::Forbidden("Account is inactive".to_string()),
            IdentityError::NotFound(_) => Self::NotFound("User not found".to_string()),
            IdentityError::Token(_) => Self::Unauthorized("Invalid or expired token".to_string()),
            IdentityError::Internal(detail) => Self::Internal(detail),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
}

/// Failure envelope: `{"success": false, "error": ...}`.
pub fn error_response(status: StatusCode, message: impl AsRef<str>) -> Response {
    let body = ErrorBody {
        success: false,
        error: message.as_ref(),
    };
    (status, Json(body)).into_response()
}

/// Success envelope: `{"success": true, "message"?: ..., "data"?: ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
