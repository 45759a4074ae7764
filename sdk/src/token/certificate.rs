//! Certificate discovery and selection.
//!
//! Certificates are read off the token as DER and parsed into
//! [`CertificateRecord`]s; `certId` matching and key-usage filtering
//! operate on those records only, so the selection logic is testable
//! without hardware.
//!
//! Matching order for `certId`:
//! 1. exact hex serial (case-insensitive)
//! 2. exact SHA-1 DER thumbprint (case-insensitive)
//! 3. serial substring (legacy, kept for deployed callers)

use {
    super::TokenError,
    cryptoki::{
        object::{Attribute, AttributeType, CertificateType, ObjectClass, ObjectHandle},
        session::Session,
    },
    x509_parser::prelude::*,
};

/// A parsed X.509 certificate plus the PKCS#11 attributes needed to
/// link it to its private key.
#[derive(Clone, Debug)]
pub struct CertificateRecord {
    pub der: Vec<u8>,
    /// CKA_ID, the standard link between a certificate and its key.
    pub p11_id: Option<Vec<u8>>,
    /// Serial number, uppercase hex without leading zeros.
    pub serial_hex: String,
    /// SHA-1 of the DER encoding, uppercase hex (40 chars).
    pub thumbprint_hex: String,
    pub subject_cn: String,
    pub issuer_cn: String,
    /// nonRepudiation (content commitment) key-usage bit.
    pub is_signing_cert: bool,
    pub is_auth_cert: bool,
}

impl CertificateRecord {
    pub fn from_der(der: Vec<u8>, p11_id: Option<Vec<u8>>) -> Result<Self, TokenError> {
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| TokenError::BadCertificate(e.to_string()))?;
        let tbs = &cert.tbs_certificate;

        let serial_hex = tbs.serial.to_str_radix(16).to_uppercase();

        let thumbprint = openssl::hash::hash(openssl::hash::MessageDigest::sha1(), &der)
            .map_err(|e| TokenError::BadCertificate(e.to_string()))?;
        let thumbprint_hex = hex::encode_upper(&thumbprint);

        let key_usage = tbs
            .key_usage()
            .ok()
            .flatten()
            .map(|ext| (ext.value.non_repudiation(), ext.value.digital_signature()));
        let is_signing_cert = key_usage.map(|(nr, _)| nr).unwrap_or(false);
        let is_auth_cert = key_usage.map(|(nr, ds)| ds && !nr).unwrap_or(false);

        let subject_cn = common_name(&tbs.subject);
        let issuer_cn = common_name(&tbs.issuer);

        Ok(Self {
            der,
            p11_id,
            serial_hex,
            thumbprint_hex,
            subject_cn,
            issuer_cn,
            is_signing_cert,
            is_auth_cert,
        })
    }
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

/// Enumerate the X.509 certificates on the token. Unparseable
/// certificates are skipped with a warning. With `signing_only`, only
/// certificates carrying the nonRepudiation bit are returned.
pub fn find_certificates(
    session: &Session,
    signing_only: bool,
) -> Result<Vec<CertificateRecord>, TokenError> {
    let handles = session.find_objects(&[
        Attribute::Class(ObjectClass::CERTIFICATE),
        Attribute::CertificateType(CertificateType::X_509),
    ])?;
    log::info!("found {} X.509 certificate(s) on token", handles.len());

    let mut records = Vec::new();
    for handle in handles {
        let attrs = session.get_attributes(handle, &[AttributeType::Value, AttributeType::Id])?;

        let mut der = None;
        let mut p11_id = None;
        for attr in attrs {
            match attr {
                Attribute::Value(v) => der = Some(v),
                Attribute::Id(v) => p11_id = Some(v),
                _ => {}
            }
        }
        let Some(der) = der else {
            log::warn!("certificate object without CKA_VALUE, skipping");
            continue;
        };

        match CertificateRecord::from_der(der, p11_id) {
            Ok(record) => {
                if signing_only && !record.is_signing_cert {
                    log::debug!("skipping non-signing certificate: CN={}", record.subject_cn);
                    continue;
                }
                log::debug!(
                    "certificate: CN={}, serial={}, signing={}",
                    record.subject_cn,
                    record.serial_hex,
                    record.is_signing_cert
                );
                records.push(record);
            }
            Err(e) => log::warn!("failed to parse certificate: {e}"),
        }
    }
    Ok(records)
}

/// Match a `certId` against parsed certificates. First match wins.
pub fn match_certificate<'a>(
    certs: &'a [CertificateRecord],
    cert_id: &str,
) -> Option<&'a CertificateRecord> {
    let needle = cert_id.trim().to_uppercase();

    if let Some(found) = certs.iter().find(|c| c.serial_hex == needle) {
        log::info!("certificate matched by serial: CN={}", found.subject_cn);
        return Some(found);
    }
    if let Some(found) = certs.iter().find(|c| c.thumbprint_hex == needle) {
        log::info!("certificate matched by thumbprint: CN={}", found.subject_cn);
        return Some(found);
    }
    // Legacy: partial serials from older callers.
    if let Some(found) = certs.iter().find(|c| c.serial_hex.contains(&needle)) {
        log::info!("certificate matched by partial serial: CN={}", found.subject_cn);
        return Some(found);
    }

    log::warn!(
        "no certificate matching certId={cert_id:?} among {} certificate(s)",
        certs.len()
    );
    None
}

/// Locate the private key for a certificate: first by CKA_ID, then
/// falling back to the first private key on the token.
pub fn find_private_key(
    session: &Session,
    cert: &CertificateRecord,
) -> Result<Option<ObjectHandle>, TokenError> {
    if let Some(id) = &cert.p11_id {
        let keys = session.find_objects(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Id(id.clone()),
        ])?;
        if let Some(key) = keys.first() {
            log::info!("private key found by CKA_ID match");
            return Ok(Some(*key));
        }
    }

    let keys = session.find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])?;
    match keys.first() {
        Some(key) => {
            log::info!("private key found - first key on token");
            Ok(Some(*key))
        }
        None => {
            log::warn!("no private key found on token");
            Ok(None)
        }
    }
}
