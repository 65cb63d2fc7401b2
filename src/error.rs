use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Everything a handler can report to a client. Store and crypto detail
/// stays in the logs; clients only ever see the generic 500 message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Email and password are required")]
    MissingField,
    #[error("Invalid email format")]
    InvalidEmailFormat,
    #[error("Password must be at least 8 characters long")]
    WeakPassword,
    #[error("User with this email already exists")]
    DuplicateUser,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Missing Bearer token")]
    MissingToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Invalid token")]
    TokenInvalid,
    #[error("User record already exists")]
    StoreWriteConflict,
    #[error("Internal server error")]
    StoreUnavailable(String),
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField => StatusCode::BAD_REQUEST,
            ApiError::InvalidEmailFormat => StatusCode::BAD_REQUEST,
            ApiError::WeakPassword => StatusCode::BAD_REQUEST,
            ApiError::DuplicateUser => StatusCode::CONFLICT,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::MissingToken => StatusCode::UNAUTHORIZED,
            ApiError::TokenExpired => StatusCode::UNAUTHORIZED,
            ApiError::TokenInvalid => StatusCode::UNAUTHORIZED,
            ApiError::StoreWriteConflict => StatusCode::CONFLICT,
            ApiError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::StoreUnavailable(detail) => {
                error!(error = %detail, "store unavailable");
            }
            ApiError::Internal(detail) => {
                error!(error = %detail, "internal error");
            }
            _ => {}
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ApiError::StoreWriteConflict,
            StoreError::Unavailable(detail) => ApiError::StoreUnavailable(detail),
        }
    }
}

impl From<crate::auth::jwt::TokenError> for ApiError {
    fn from(err: crate::auth::jwt::TokenError) -> Self {
        match err {
            crate::auth::jwt::TokenError::Expired => ApiError::TokenExpired,
            crate::auth::jwt::TokenError::Invalid => ApiError::TokenInvalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_generic_message() {
        let err = ApiError::from(StoreError::Unavailable("table missing".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Internal detail must never reach the client-facing message.
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = ApiError::from(StoreError::Conflict);
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn expired_and_invalid_tokens_stay_distinct() {
        let expired = ApiError::from(crate::auth::jwt::TokenError::Expired);
        let invalid = ApiError::from(crate::auth::jwt::TokenError::Invalid);
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(expired.to_string(), invalid.to_string());
    }
}
