use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use emberlink_types::OidcErrorBody;
use thiserror::Error;

use crate::{crypto::CryptoError, store::StoreError};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error taxonomy of the provider. Variants carry enough information for the
/// HTTP edge to produce the correct OIDC error code without inspecting
/// internals; server-side detail stays in the log.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Unknown tenant")]
    UnknownTenant,

    #[error("Resource not found")]
    NotFound,

    #[error("Unique constraint violation")]
    UniqueViolation,

    #[error("Cross-tenant access rejected")]
    CrossTenant,

    #[error("Database connection error: {0}")]
    DbConnectionError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// OIDC error code for the JSON body.
    pub fn oidc_code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) | ApiError::UnknownTenant => {
                "invalid_request"
            }
            ApiError::UnauthorizedClient(_) => "unauthorized_client",
            ApiError::InvalidClient(_) => "invalid_client",
            ApiError::InvalidGrant(_) => "invalid_grant",
            ApiError::UnsupportedGrantType(_) => "unsupported_grant_type",
            ApiError::AccessDenied(_) => "access_denied",
            ApiError::RateLimited => "rate_limited",
            ApiError::NotFound => "not_found",
            ApiError::UniqueViolation => "conflict",
            ApiError::CrossTenant
            | ApiError::DbConnectionError(_)
            | ApiError::DatabaseError(_)
            | ApiError::Store(_)
            | ApiError::Crypto(_)
            | ApiError::Upstream(_)
            | ApiError::Internal(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_)
            | ApiError::UnauthorizedClient(_)
            | ApiError::InvalidGrant(_)
            | ApiError::UnsupportedGrantType(_)
            | ApiError::AccessDenied(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UnknownTenant | ApiError::NotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::UniqueViolation => StatusCode::CONFLICT,
            ApiError::CrossTenant
            | ApiError::DbConnectionError(_)
            | ApiError::DatabaseError(_)
            | ApiError::Store(_)
            | ApiError::Crypto(_)
            | ApiError::Upstream(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-safe description. 5xx detail is never echoed back.
    pub fn public_description(&self) -> Option<String> {
        match self {
            ApiError::InvalidRequest(msg)
            | ApiError::UnauthorizedClient(msg)
            | ApiError::InvalidClient(msg)
            | ApiError::InvalidGrant(msg)
            | ApiError::UnsupportedGrantType(msg)
            | ApiError::AccessDenied(msg) => Some(msg.clone()),
            ApiError::RateLimited => Some("rate_limited".into()),
            ApiError::UnknownTenant => Some("unknown tenant".into()),
            ApiError::NotFound => Some("not found".into()),
            ApiError::UniqueViolation => Some("already exists".into()),
            _ => None,
        }
    }

    pub fn to_body(&self) -> OidcErrorBody {
        OidcErrorBody {
            error: self.oidc_code().to_string(),
            error_description: self.public_description(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ApiError::DbConnectionError(e.to_string())
            }

            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => ApiError::UniqueViolation,
                _ => ApiError::DatabaseError(db_err.message().to_string()),
            },

            sqlx::Error::RowNotFound => ApiError::NotFound,

            _ => ApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            log::error!("{self}");
        }
        (self.status(), Json(self.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_tenant_does_not_leak_detail() {
        let err = ApiError::CrossTenant;
        let body = err.to_body();
        assert_eq!(body.error, "server_error");
        assert_eq!(body.error_description, None);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn pkce_failure_maps_to_invalid_grant() {
        let err = ApiError::InvalidGrant("pkce_verification_failed".into());
        let body = err.to_body();
        assert_eq!(body.error, "invalid_grant");
        assert_eq!(
            body.error_description.as_deref(),
            Some("pkce_verification_failed")
        );
    }
}
