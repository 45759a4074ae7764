//! Detached PKCS#7 / CMS SignedData.
//!
//! Builds the DER structure embedded into PDF signatures
//! (`adbe.pkcs7.detached`): SignedData v1 with a single SignerInfo,
//! SHA-256 digests, signed attributes (contentType + messageDigest),
//! and the signer certificate included. The RSA signature itself
//! comes from the [`TokenKey`] capability.

use {
    super::{SignError, TokenKey},
    crate::token::certificate::CertificateRecord,
    x509_parser::prelude::*,
    yasna::{models::ObjectIdentifier, DERWriter, Tag},
};

fn oid(components: &[u64]) -> ObjectIdentifier {
    ObjectIdentifier::from_slice(components)
}

fn oid_signed_data() -> ObjectIdentifier {
    oid(&[1, 2, 840, 113549, 1, 7, 2])
}

fn oid_data() -> ObjectIdentifier {
    oid(&[1, 2, 840, 113549, 1, 7, 1])
}

fn oid_sha256() -> ObjectIdentifier {
    oid(&[2, 16, 840, 1, 101, 3, 4, 2, 1])
}

fn oid_sha256_with_rsa() -> ObjectIdentifier {
    oid(&[1, 2, 840, 113549, 1, 1, 11])
}

fn oid_attr_content_type() -> ObjectIdentifier {
    oid(&[1, 2, 840, 113549, 1, 9, 3])
}

fn oid_attr_message_digest() -> ObjectIdentifier {
    oid(&[1, 2, 840, 113549, 1, 9, 4])
}

fn write_algorithm(writer: DERWriter<'_>, algorithm: ObjectIdentifier) {
    writer.write_sequence(|writer| {
        writer.next().write_oid(&algorithm);
        writer.next().write_null();
    });
}

/// DER of the signed attributes as `SET OF Attribute` (tag 0x31).
/// This is the exact byte string the RSA signature covers.
fn signed_attributes_der(content_digest: &[u8]) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_set_of(|writer| {
            writer.next().write_sequence(|writer| {
                writer.next().write_oid(&oid_attr_content_type());
                writer.next().write_set_of(|writer| {
                    writer.next().write_oid(&oid_data());
                });
            });
            writer.next().write_sequence(|writer| {
                writer.next().write_oid(&oid_attr_message_digest());
                writer.next().write_set_of(|writer| {
                    writer.next().write_bytes(content_digest);
                });
            });
        })
    })
}

/// Build a detached SignedData over content whose SHA-256 digest is
/// `content_digest`, signed by `key` and naming `cert` as the signer.
pub fn build_detached_pkcs7(
    content_digest: &[u8],
    cert: &CertificateRecord,
    key: &dyn TokenKey,
) -> Result<Vec<u8>, SignError> {
    // Issuer and serial come straight out of the certificate DER so
    // the IssuerAndSerialNumber matches byte-for-byte.
    let (_, parsed) = X509Certificate::from_der(&cert.der)
        .map_err(|e| SignError::internal(format!("signer certificate unparseable: {e}")))?;
    let issuer_der = parsed.tbs_certificate.issuer.as_raw().to_vec();
    let serial_bytes = parsed.tbs_certificate.raw_serial().to_vec();

    let signed_attrs = signed_attributes_der(content_digest);
    let signature = key.sign_sha256_rsa(&signed_attrs)?;

    // In the SignerInfo the same attributes appear as [0] IMPLICIT:
    // identical body, tag byte 0x31 replaced by 0xA0.
    let mut signed_attrs_implicit = signed_attrs;
    signed_attrs_implicit[0] = 0xA0;

    let der = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_oid(&oid_signed_data());
            writer.next().write_tagged(Tag::context(0), |writer| {
                writer.write_sequence(|writer| {
                    writer.next().write_i64(1);
                    writer.next().write_set_of(|writer| {
                        write_algorithm(writer.next(), oid_sha256());
                    });
                    // Detached: encapContentInfo carries no eContent.
                    writer.next().write_sequence(|writer| {
                        writer.next().write_oid(&oid_data());
                    });
                    writer
                        .next()
                        .write_tagged_implicit(Tag::context(0), |writer| {
                            writer.write_set_of(|writer| {
                                writer.next().write_der(&cert.der);
                            });
                        });
                    writer.next().write_set_of(|writer| {
                        writer.next().write_sequence(|writer| {
                            writer.next().write_i64(1);
                            writer.next().write_sequence(|writer| {
                                writer.next().write_der(&issuer_der);
                                writer.next().write_bigint_bytes(&serial_bytes, true);
                            });
                            write_algorithm(writer.next(), oid_sha256());
                            writer.next().write_der(&signed_attrs_implicit);
                            write_algorithm(writer.next(), oid_sha256_with_rsa());
                            writer.next().write_bytes(&signature);
                        });
                    });
                });
            });
        })
    });

    Ok(der)
}
