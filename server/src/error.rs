use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use common::{CategoryError, stats::LabelError};
use serde_json::json;
use tracing::{error, warn};

pub type Result<T, E = StatsError> = std::result::Result<T, E>;

/// Errors surfaced by the stats service.
///
/// Every variant maps to a stable `kind()` string and HTTP status. Messages
/// for authentication never mention whether an email or id exists.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Missing, unknown or mismatched credential.
    #[error("missing or invalid credentials")]
    AuthenticationFailure,

    #[error("token has expired")]
    TokenExpired,

    #[error("token is malformed or has an invalid signature")]
    TokenMalformed,

    /// Valid credential, insufficient role or lane.
    #[error("not permitted: {0}")]
    AuthorizationFailure(&'static str),

    #[error(transparent)]
    InvalidCategory(#[from] CategoryError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    /// A destructive operation was requested without a valid confirmation.
    /// Carries a fresh intent when one was issued for this request.
    #[error("confirmation required: {reason}")]
    ConfirmationRequired {
        reason: &'static str,
        confirmation_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },

    #[error("too many requests; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Pool exhaustion or statement timeout; the caller may retry with backoff.
    #[error("service busy: {0}")]
    ResourcePressure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StatsError {
    pub fn kind(&self) -> &'static str {
        match self {
            StatsError::AuthenticationFailure
            | StatsError::TokenExpired
            | StatsError::TokenMalformed => "authentication_failure",
            StatsError::AuthorizationFailure(_) => "authorization_failure",
            StatsError::InvalidCategory(_) | StatsError::Validation(_) => "validation_failure",
            StatsError::NotFound(_) => "not_found",
            StatsError::Conflict(_) => "conflict",
            StatsError::ConfirmationRequired { .. } => "confirmation_required",
            StatsError::RateLimited { .. } => "rate_limited",
            StatsError::ResourcePressure(_) => "resource_pressure",
            StatsError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StatsError::AuthenticationFailure
            | StatsError::TokenExpired
            | StatsError::TokenMalformed => StatusCode::UNAUTHORIZED,
            StatsError::AuthorizationFailure(_) => StatusCode::FORBIDDEN,
            StatsError::InvalidCategory(_) | StatsError::Validation(_) => StatusCode::BAD_REQUEST,
            StatsError::NotFound(_) => StatusCode::NOT_FOUND,
            StatsError::Conflict(_) | StatsError::ConfirmationRequired { .. } => {
                StatusCode::CONFLICT
            }
            StatsError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            StatsError::ResourcePressure(_) => StatusCode::SERVICE_UNAVAILABLE,
            StatsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds for the `Retry-After` header, for errors worth retrying.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            StatsError::ResourcePressure(_) => Some(1),
            StatsError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_after().is_some()
    }
}

impl From<LabelError> for StatsError {
    fn from(err: LabelError) -> Self {
        StatsError::Validation(err.to_string())
    }
}

impl From<sqlx::Error> for StatsError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => {
                StatsError::ResourcePressure("database pool exhausted".to_string())
            }
            sqlx::Error::RowNotFound => StatsError::NotFound("row"),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // query_canceled, raised by statement_timeout
                Some("57014") => StatsError::ResourcePressure("database query timed out".to_string()),
                Some("23505") => StatsError::Conflict("a record with these values already exists".to_string()),
                Some("23503") => StatsError::NotFound("referenced record"),
                Some("23514") => StatsError::Validation(db_err.message().to_string()),
                _ => StatsError::Internal(err.to_string()),
            },
            _ => StatsError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for StatsError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            StatsError::Internal(details) => {
                error!("API error: {}", details);
                "Internal server error".to_string()
            }
            StatsError::AuthenticationFailure
            | StatsError::TokenExpired
            | StatsError::TokenMalformed => {
                warn!("Rejected credentials: {}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let mut body = json!({
            "error": self.kind(),
            "message": message,
        });
        if let StatsError::ConfirmationRequired {
            confirmation_token: Some(token),
            expires_at,
            ..
        } = &self
        {
            body["confirmation_token"] = json!(token);
            body["expires_at"] = json!(expires_at);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
