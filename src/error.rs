use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::database::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid or expired identity assertion: {0}")]
    InvalidAssertion(String),

    #[error("Could not determine the user's email address")]
    MissingEmail,

    #[error("Email address has not been verified. Check your inbox before continuing")]
    EmailNotVerified,

    #[error("Supplied subject id does not match the verified assertion")]
    SubjectMismatch,

    #[error("This email is already registered. Please log in instead")]
    EmailAlreadyRegistered,

    #[error("Handle '{0}' is already taken")]
    HandleTaken(String),

    #[error("User not found. Registration must be completed first")]
    UserNotFound,

    #[error("Profile is already complete or the user is not awaiting profile completion")]
    InvalidProfileState,

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

}

impl Error {
    /// Stable machine-checkable identifier for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::InvalidAssertion(_) => "invalid_assertion",
            Error::MissingEmail => "missing_email",
            Error::EmailNotVerified => "email_not_verified",
            Error::SubjectMismatch => "subject_mismatch",
            Error::EmailAlreadyRegistered => "email_already_registered",
            Error::HandleTaken(_) => "handle_taken",
            Error::UserNotFound => "user_not_found",
            Error::InvalidProfileState => "invalid_profile_state",
            Error::Validation(_) => "validation_error",
            Error::Storage(_) => "storage_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::MissingEmail | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::InvalidAssertion(_) => StatusCode::UNAUTHORIZED,
            Error::EmailNotVerified | Error::SubjectMismatch => StatusCode::FORBIDDEN,
            Error::EmailAlreadyRegistered | Error::HandleTaken(_) | Error::InvalidProfileState => {
                StatusCode::CONFLICT
            }
            Error::UserNotFound => StatusCode::NOT_FOUND,
            Error::Config(_) | Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let error_message = match &self {
            Error::Storage(err) => {
                tracing::error!(error = %err, "Storage failure surfaced to caller");
                "An unexpected storage error occurred".to_string()
            }
            Error::Config(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_kinds_map_to_409() {
        assert_eq!(Error::EmailAlreadyRegistered.status(), StatusCode::CONFLICT);
        assert_eq!(Error::InvalidProfileState.status(), StatusCode::CONFLICT);
        assert_eq!(Error::HandleTaken("ana".into()).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::EmailNotVerified.code(), "email_not_verified");
        assert_eq!(Error::MissingEmail.code(), "missing_email");
        assert_eq!(
            Error::Storage(StoreError::Unavailable("down".into())).code(),
            "storage_error"
        );
    }

    #[test]
    fn remaining_kinds_map_to_client_or_server_errors() {
        assert_eq!(Error::MissingEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Validation(validator::ValidationErrors::new()).status(),
            StatusCode::BAD_REQUEST
        );
        for err in [
            Error::Config("DATABASE_URL missing".into()),
            Error::Storage(StoreError::Unavailable("pool closed".into())),
        ] {
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(!err.code().is_empty());
        }
    }
}
