//! PKCS#11 token stack: vendor library loading, slot enumeration,
//! authenticated sessions, and certificate/key selection.

pub mod certificate;
pub mod manager;

use {crate::protocol::error::ErrorCode, thiserror::Error};

/// Token-level failures, mapped to wire codes via [`TokenError::code`].
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Incorrect token PIN")]
    PinIncorrect,
    #[error("Token PIN is locked - contact your administrator")]
    PinLocked,
    #[error("Token PIN has expired - please change it")]
    PinExpired,
    #[error("HSM token was removed during operation")]
    TokenRemoved,
    #[error("HSM device error: {0}")]
    Device(String),
    #[error("PKCS#11 error: {0}")]
    Pkcs11(String),
    #[error("failed to parse certificate: {0}")]
    BadCertificate(String),
}

impl TokenError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TokenError::TokenRemoved => ErrorCode::CertNotFound,
            _ => ErrorCode::SignFailed,
        }
    }
}

impl From<cryptoki::error::Error> for TokenError {
    fn from(err: cryptoki::error::Error) -> Self {
        use cryptoki::error::{Error, RvError};
        match err {
            Error::Pkcs11(RvError::PinIncorrect, _) => TokenError::PinIncorrect,
            Error::Pkcs11(RvError::PinLocked, _) => TokenError::PinLocked,
            Error::Pkcs11(RvError::PinExpired, _) => TokenError::PinExpired,
            Error::Pkcs11(RvError::TokenNotPresent, _) => TokenError::TokenRemoved,
            Error::Pkcs11(RvError::DeviceRemoved, _) => TokenError::TokenRemoved,
            Error::Pkcs11(RvError::DeviceError, _) => TokenError::Device(err.to_string()),
            other => TokenError::Pkcs11(other.to_string()),
        }
    }
}
