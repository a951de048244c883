use thiserror::Error;

pub type Result<T> = std::result::Result<T, VigilError>;

/// Domain errors. Each variant carries a stable code; HTTP status mapping
/// lives with the API.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("user not found")]
    UserNotFound,

    #[error("emergency contact not found")]
    ContactNotFound,

    #[error("SOS event not found")]
    SosNotFound,

    #[error("personal message not found")]
    MessageNotFound,

    #[error("consent request not found or expired")]
    ConsentNotFound,

    #[error("maximum of {0} emergency contacts reached")]
    MaxContactsExceeded(usize),

    #[error("contact with this value already exists")]
    DuplicateContact,

    #[error("invalid {kind} contact value")]
    InvalidContactValue { kind: String },

    #[error("email already registered")]
    DuplicateEmail,

    #[error("{0}")]
    Validation(String),

    #[error("message exceeds {max} characters (got {actual})")]
    MessageTooLong { max: usize, actual: usize },

    #[error("failed to decrypt message")]
    Decryption,

    #[error("account is deactivated")]
    InactiveUser,

    #[error("permission denied")]
    PermissionDenied,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl VigilError {
    pub fn code(&self) -> &'static str {
        match self {
            VigilError::UserNotFound => "USER_NOT_FOUND",
            VigilError::ContactNotFound => "CONTACT_NOT_FOUND",
            VigilError::SosNotFound => "SOS_NOT_FOUND",
            VigilError::MessageNotFound => "MESSAGE_NOT_FOUND",
            VigilError::ConsentNotFound => "CONSENT_NOT_FOUND",
            VigilError::MaxContactsExceeded(_) => "CONTACT001",
            VigilError::DuplicateContact => "CONTACT002",
            VigilError::InvalidContactValue { .. } => "INVALID_CONTACT_VALUE",
            VigilError::DuplicateEmail => "DUPLICATE_EMAIL",
            VigilError::Validation(_) => "VALIDATION_ERROR",
            VigilError::MessageTooLong { .. } => "MESSAGE001",
            VigilError::Decryption => "MESSAGE002",
            VigilError::InactiveUser => "INACTIVE_USER",
            VigilError::PermissionDenied => "PERMISSION_DENIED",
            VigilError::Database(_) | VigilError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
