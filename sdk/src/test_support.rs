//! Shared fixtures for unit tests: self-signed certificates and a
//! deterministic stand-in for the token key.

use {
    crate::{sign::TokenKey, token::TokenError},
    openssl::{
        asn1::{Asn1Integer, Asn1Time},
        bn::BigNum,
        hash::MessageDigest,
        pkey::PKey,
        rsa::Rsa,
        x509::{extension::KeyUsage, X509Builder, X509NameBuilder},
    },
};

/// Mint a self-signed RSA certificate with the given serial. The
/// nonRepudiation bit marks it as a signing certificate.
pub(crate) fn make_cert_der(serial: u32, non_repudiation: bool) -> Vec<u8> {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "Test Signer").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();

    let serial_bn = BigNum::from_u32(serial).unwrap();
    let serial = Asn1Integer::from_bn(&serial_bn).unwrap();
    builder.set_serial_number(&serial).unwrap();

    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    let mut usage = KeyUsage::new();
    usage.digital_signature();
    if non_repudiation {
        usage.non_repudiation();
    }
    builder.append_extension(usage.build().unwrap()).unwrap();

    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    builder.build().to_der().unwrap()
}

/// Token key stand-in: echoes a recognizable marker instead of a real
/// RSA signature so tests can assert where the signature ends up.
pub(crate) struct FakeKey;

pub(crate) const FAKE_SIGNATURE: &[u8] = b"FAKE-SHA256-RSA-SIGNATURE";

impl TokenKey for FakeKey {
    fn sign_sha256_rsa(&self, _data: &[u8]) -> Result<Vec<u8>, TokenError> {
        Ok(FAKE_SIGNATURE.to_vec())
    }

    fn modulus_bits(&self) -> u32 {
        2048
    }
}

/// A key that always fails, for error-path tests.
pub(crate) struct BrokenKey;

impl TokenKey for BrokenKey {
    fn sign_sha256_rsa(&self, _data: &[u8]) -> Result<Vec<u8>, TokenError> {
        Err(TokenError::Device("device error 0x30".to_string()))
    }

    fn modulus_bits(&self) -> u32 {
        2048
    }
}

/// Find a byte subsequence.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
