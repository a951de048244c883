use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use vigil_core::VigilError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Every error response has the body `{code, message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.code,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

fn status_for(err: &VigilError) -> StatusCode {
    match err {
        VigilError::UserNotFound
        | VigilError::ContactNotFound
        | VigilError::SosNotFound
        | VigilError::MessageNotFound
        | VigilError::ConsentNotFound => StatusCode::NOT_FOUND,
        VigilError::MaxContactsExceeded(_) | VigilError::MessageTooLong { .. } => StatusCode::BAD_REQUEST,
        VigilError::DuplicateContact | VigilError::DuplicateEmail => StatusCode::CONFLICT,
        VigilError::Validation(_) | VigilError::InvalidContactValue { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        VigilError::InactiveUser | VigilError::PermissionDenied => StatusCode::FORBIDDEN,
        VigilError::Decryption | VigilError::Database(_) | VigilError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        match err {
            VigilError::Database(_) | VigilError::Internal(_) => {
                tracing::error!("Request failed: {}", err);
                ApiError::internal()
            }
            VigilError::Decryption => {
                tracing::error!("Stored message could not be decrypted");
                ApiError::new(status_for(&err), err.code(), err.to_string())
            }
            _ => ApiError::new(status_for(&err), err.code(), err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            rejection.body_text(),
        )
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            rejection.body_text(),
        )
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            rejection.body_text(),
        )
    }
}

/// `Json` whose rejection uses the common error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (VigilError::SosNotFound, StatusCode::NOT_FOUND, "SOS_NOT_FOUND"),
            (VigilError::MaxContactsExceeded(3), StatusCode::BAD_REQUEST, "CONTACT001"),
            (VigilError::DuplicateContact, StatusCode::CONFLICT, "CONTACT002"),
            (VigilError::DuplicateEmail, StatusCode::CONFLICT, "DUPLICATE_EMAIL"),
            (
                VigilError::MessageTooLong { max: 2000, actual: 2001 },
                StatusCode::BAD_REQUEST,
                "MESSAGE001",
            ),
            (VigilError::Decryption, StatusCode::INTERNAL_SERVER_ERROR, "MESSAGE002"),
            (VigilError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            (VigilError::InactiveUser, StatusCode::FORBIDDEN, "INACTIVE_USER"),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let api = ApiError::from(VigilError::Internal(anyhow::anyhow!("connection refused to 10.0.0.5")));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code, "INTERNAL_ERROR");
        assert!(!api.message.contains("10.0.0.5"));
    }
}
