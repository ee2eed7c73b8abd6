use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
///
/// The first nine variants are protocol rejections with a stable status and
/// code. Everything else collapses into a server error whose details only
/// reach the logs.
#[derive(Error, Debug)]
pub enum AppError {
    /// One or more required request fields are absent.
    #[error("Missing required fields: {0}")]
    MissingFields(String),

    /// The session id is not a valid UUID.
    #[error("Malformed session id")]
    MalformedSessionId,

    /// The session does not exist, has not started, or has expired.
    #[error("Session not active")]
    SessionNotActive,

    /// The stored session signature does not verify against its pinned key.
    #[error("Invalid session signature")]
    InvalidSessionSignature,

    /// The nonce was never issued for this session or was already used.
    #[error("Invalid or reused nonce")]
    InvalidOrReusedNonce,

    /// The student is not on the roster of the session's class.
    #[error("Student not in session class")]
    StudentNotInClass,

    /// Attendance for this (session, student) pair already exists.
    #[error("Attendance already recorded")]
    DuplicateAttendance,

    /// Every nonce attempt collided with an existing value.
    #[error("Nonce generation failed after {0} attempts")]
    NonceGenerationFailed(usize),

    /// Uploaded or configured key material could not be decoded.
    #[error("Invalid key material: {0}")]
    KeyMaterialInvalid(String),

    /// The body or path could not be decoded into the expected shape.
    #[error("Malformed request")]
    MalformedRequest,

    /// A request field is present but unacceptable.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other internal failure.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingFields(_) => "MISSING_FIELDS",
            AppError::MalformedSessionId => "MALFORMED_SESSION_ID",
            AppError::SessionNotActive => "SESSION_NOT_ACTIVE",
            AppError::InvalidSessionSignature => "INVALID_SESSION_SIGNATURE",
            AppError::InvalidOrReusedNonce => "INVALID_OR_REUSED_NONCE",
            AppError::StudentNotInClass => "STUDENT_NOT_IN_CLASS",
            AppError::DuplicateAttendance => "DUPLICATE_ATTENDANCE",
            AppError::NonceGenerationFailed(_) => "NONCE_GENERATION_FAILED",
            AppError::KeyMaterialInvalid(_) => "KEY_MATERIAL_INVALID",
            AppError::MalformedRequest => "MALFORMED_REQUEST",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Io(_)
            | AppError::Unexpected(_) => "UNEXPECTED",
        }
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingFields(_)
            | AppError::MalformedSessionId
            | AppError::KeyMaterialInvalid(_)
            | AppError::MalformedRequest
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::SessionNotActive
            | AppError::InvalidSessionSignature
            | AppError::InvalidOrReusedNonce
            | AppError::StudentNotInClass => StatusCode::FORBIDDEN,
            AppError::DuplicateAttendance => StatusCode::CONFLICT,
            AppError::NonceGenerationFailed(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Io(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rejections raised after the nonce was consumed. The consumption is
    /// committed for these so the nonce cannot be replayed.
    pub fn burns_nonce(&self) -> bool {
        matches!(
            self,
            AppError::StudentNotInClass | AppError::DuplicateAttendance
        )
    }
}

// Extractor rejections carry serde and parser text; it stays in the logs.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        AppError::MalformedRequest
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!("Rejected request path: {}", rejection.body_text());
        AppError::MalformedRequest
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                "Internal server error".to_string()
            }

            AppError::Unexpected(ref msg) => {
                tracing::error!("Unexpected error: {}", msg);
                "Internal server error".to_string()
            }

            AppError::NonceGenerationFailed(attempts) => {
                tracing::error!("Nonce generation exhausted {} attempts", attempts);
                "Nonce generation failed, please retry".to_string()
            }

            AppError::KeyMaterialInvalid(ref detail) => {
                tracing::warn!("Rejected key material: {}", detail);
                "Public key is not valid PEM or base64 RSA key material".to_string()
            }

            AppError::MalformedRequest => {
                "Request body or path is malformed".to_string()
            }

            AppError::MissingFields(_) | AppError::Validation(_) => {
                tracing::debug!("Bad request: {}", self);
                self.to_string()
            }

            ref rejection => {
                tracing::warn!("Request rejected: {}", rejection);
                rejection.to_string()
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message,
            "code": self.code(),
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error","code":"UNEXPECTED"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
