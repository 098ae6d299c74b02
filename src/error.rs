//! Error types and HTTP error response handling.
//!
//! This module defines all application errors, the private chat messages
//! shown for them, and how they are converted into HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors raised by the key store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A key with the same code already exists.
    #[error("duplicate key code")]
    DuplicateKey,

    /// A persisted value could not be mapped back into the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::Corrupt(format!("column {index}: {source}"))
            }
            other => StoreError::Database(other),
        }
    }
}

/// Errors raised while talking to the chat platform.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with a non-success status.
    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid platform url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

/// Application-wide error type.
///
/// Every variant has a private chat message (see [`AppError::user_message`])
/// and an HTTP mapping used when the error escapes a route handler.
///
/// # Error Categories
///
/// - **Authorization**: caller lacks the owner capability
/// - **Redemption**: unknown or consumed key, failed role grant
/// - **Generation**: store rejected the new key
/// - **Request**: bad signature, malformed payload, bad arguments
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Caller does not hold the owner capability.
    #[error("Permission denied")]
    PermissionDenied,

    /// No key with this code exists.
    #[error("Invalid key")]
    InvalidKey,

    /// The key exists but was already consumed, or a concurrent redemption won.
    #[error("Invalid or already used key")]
    AlreadyUsedOrInvalid,

    /// The store refused the freshly generated key.
    #[error("Key generation failed")]
    GenerationFailed(#[source] StoreError),

    /// The buyer role could not be granted; the key was left untouched.
    #[error("Role grant failed")]
    GrantFailed(#[source] PlatformError),

    /// Temporary keys need a positive number of minutes.
    #[error("Invalid duration: {0}")]
    InvalidDuration(i64),

    /// The command was issued outside of a server.
    #[error("Command used outside of a server")]
    NotInGuild,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Permission lookup against the platform failed.
    #[error("Platform error")]
    Platform(#[from] PlatformError),

    #[error("Store error")]
    Store(#[from] StoreError),

    /// Missing or invalid Ed25519 request signature.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid request signature")]
    InvalidSignature,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),
}

impl AppError {
    /// Text shown to the invoking user in a private (ephemeral) reply.
    ///
    /// `InvalidKey` and `AlreadyUsedOrInvalid` share one message so a caller
    /// cannot tell a never-issued code from a consumed one.
    pub fn user_message(&self) -> String {
        match self {
            AppError::PermissionDenied => {
                "You don't have permission to use this command.".to_string()
            }
            AppError::InvalidKey | AppError::AlreadyUsedOrInvalid => {
                "Invalid or already used key.".to_string()
            }
            AppError::GenerationFailed(_) => "Error generating key. Please try again.".to_string(),
            AppError::GrantFailed(_) => {
                "Could not grant the buyer role. Your key was not used, please try again."
                    .to_string()
            }
            AppError::InvalidDuration(_) => "Minutes must be a positive number.".to_string(),
            AppError::NotInGuild => "This command can only be used in a server.".to_string(),
            AppError::UnknownCommand(name) => format!("Unknown command `{name}`."),
            AppError::Platform(_) | AppError::Store(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            AppError::InvalidSignature => self.to_string(),
            AppError::InvalidRequest(msg) => msg.clone(),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Store and platform failures return 500 without internal details.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied"),
            AppError::InvalidKey | AppError::AlreadyUsedOrInvalid => {
                (StatusCode::NOT_FOUND, "invalid_key")
            }
            AppError::InvalidRequest(_)
            | AppError::InvalidDuration(_)
            | AppError::NotInGuild
            | AppError::UnknownCommand(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::GenerationFailed(_)
            | AppError::GrantFailed(_)
            | AppError::Platform(_)
            | AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.user_message()
            }
        }));

        (status, body).into_response()
    }
}
