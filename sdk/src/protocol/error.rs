//! Stable wire error identifiers and validation failures.

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// The stable error codes of the wire protocol. These identifiers are
/// part of the contract with callers; never rename them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedVersion,
    UnsupportedType,
    CertNotFound,
    SignFailed,
    DownloadFailed,
    UploadFailed,
    Timeout,
    ProgressEndpointFailed,
    CancelledByUser,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::UnsupportedType => "UNSUPPORTED_TYPE",
            ErrorCode::CertNotFound => "CERT_NOT_FOUND",
            ErrorCode::SignFailed => "SIGN_FAILED",
            ErrorCode::DownloadFailed => "DOWNLOAD_FAILED",
            ErrorCode::UploadFailed => "UPLOAD_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ProgressEndpointFailed => "PROGRESS_ENDPOINT_FAILED",
            ErrorCode::CancelledByUser => "CANCELLED_BY_USER",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request failed structural or semantic validation. Carries the
/// wire code it maps to and a message naming the offending field.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }
}
