//! Signature production.
//!
//! The engine hands every resolved object to an [`ObjectSigner`];
//! [`TokenObjectSigner`] is the production implementation, dispatching
//! on the object's data type:
//!
//! - text / json: SHA-256 of the UTF-8 content, signed with the
//!   token's SHA256-with-RSA mechanism, emitted as base64
//! - binary: the same, emitted as raw signature bytes
//! - pdf: PKCS#7-embedded signature in the document ([`pdf`])
//! - xml: enveloped XMLDSig ([`xmldsig`])
//!
//! The token private key is abstracted behind [`TokenKey`] so the
//! format layers depend on a signing capability, not on a PKCS#11
//! handle, and tests can substitute a fake.

pub mod pdf;
pub mod pkcs7;
pub mod xmldsig;

use {
    crate::{
        protocol::{error::ErrorCode, resolve::ResolvedObject, wire::DataType},
        token::{certificate::CertificateRecord, TokenError},
    },
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    cryptoki::{
        mechanism::Mechanism,
        object::{Attribute, AttributeType, ObjectHandle},
        session::Session,
    },
    sha2::{Digest as _, Sha256},
    std::sync::Mutex,
    thiserror::Error,
};

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct SignError {
    pub code: ErrorCode,
    pub message: String,
}

impl SignError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::SignFailed,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
        }
    }
}

impl From<TokenError> for SignError {
    fn from(err: TokenError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Compute `sha256(data)` and return the raw 32-byte digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Abstract signing capability of a token private key.
///
/// `sign_sha256_rsa` is the `CKM_SHA256_RSA_PKCS` contract: the token
/// hashes the input with SHA-256 and signs the DigestInfo in one call.
pub trait TokenKey: Send + Sync {
    fn sign_sha256_rsa(&self, data: &[u8]) -> Result<Vec<u8>, TokenError>;

    /// RSA modulus size in bits; sizes the signature containers.
    fn modulus_bits(&self) -> u32;
}

/// A [`TokenKey`] backed by an authenticated PKCS#11 session.
///
/// Owns the session: all calls on it are serialized through the
/// mutex, and the session closes when the key is dropped.
pub struct P11TokenKey {
    session: Mutex<Session>,
    key: ObjectHandle,
    modulus_bits: u32,
}

impl P11TokenKey {
    pub fn new(session: Session, key: ObjectHandle) -> Self {
        let modulus_bits = read_modulus_bits(&session, key).unwrap_or(2048);
        Self {
            session: Mutex::new(session),
            key,
            modulus_bits,
        }
    }
}

fn read_modulus_bits(session: &Session, key: ObjectHandle) -> Option<u32> {
    let attrs = session
        .get_attributes(key, &[AttributeType::ModulusBits, AttributeType::Modulus])
        .ok()?;
    for attr in attrs {
        match attr {
            Attribute::ModulusBits(bits) => return Some(u64::from(bits) as u32),
            Attribute::Modulus(modulus) => return Some((modulus.len() * 8) as u32),
            _ => {}
        }
    }
    None
}

impl TokenKey for P11TokenKey {
    fn sign_sha256_rsa(&self, data: &[u8]) -> Result<Vec<u8>, TokenError> {
        let session = self
            .session
            .lock()
            .map_err(|_| TokenError::Pkcs11("session mutex poisoned".to_string()))?;
        let signature = session.sign(&Mechanism::Sha256RsaPkcs, self.key, data)?;
        log::info!("token produced {} byte signature", signature.len());
        Ok(signature)
    }

    fn modulus_bits(&self) -> u32 {
        self.modulus_bits
    }
}

/// The engine's view of the signer: one resolved object plus its
/// acquired content in, the upload payload out.
pub trait ObjectSigner: Send + Sync {
    fn sign_object(&self, object: &ResolvedObject, content: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// Production signer: a token key plus the selected certificate.
pub struct TokenObjectSigner<K: TokenKey> {
    key: K,
    cert: CertificateRecord,
}

impl<K: TokenKey> TokenObjectSigner<K> {
    pub fn new(key: K, cert: CertificateRecord) -> Self {
        Self { key, cert }
    }
}

impl<K: TokenKey> ObjectSigner for TokenObjectSigner<K> {
    fn sign_object(&self, object: &ResolvedObject, content: &[u8]) -> Result<Vec<u8>, SignError> {
        match object.data_type {
            DataType::Text | DataType::Json => {
                let signature = self.key.sign_sha256_rsa(&sha256(content))?;
                Ok(BASE64.encode(signature).into_bytes())
            }
            DataType::Binary => {
                let signature = self.key.sign_sha256_rsa(&sha256(content))?;
                Ok(signature)
            }
            DataType::Pdf => {
                let label = object.pdf_label.as_deref().unwrap_or("Digital Signature");
                pdf::sign_pdf(content, label, &self.key, &self.cert)
            }
            DataType::Xml => xmldsig::sign_xml(
                content,
                object.xml_xpath.as_deref(),
                object.xml_id_attribute.as_deref(),
                &self.key,
                &self.cert,
            ),
        }
    }
}
