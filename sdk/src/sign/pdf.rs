//! PDF signing.
//!
//! The document gains a signature form field (named by the caller's
//! `pdfOptions.label`; an existing field of that name is reused) whose
//! value dictionary carries an `adbe.pkcs7.detached` signature. The
//! serialized document is patched in place: `/ByteRange` and
//! `/Contents` are written as fixed-size placeholders, the real byte
//! ranges are computed from the output, the digest of those ranges is
//! signed via [`pkcs7`](super::pkcs7), and the DER lands inside the
//! reserved `/Contents` hex string.

use {
    super::{pkcs7::build_detached_pkcs7, SignError, TokenKey},
    crate::token::certificate::CertificateRecord,
    chrono::Utc,
    lopdf::{dictionary, Document, Object, ObjectId, StringFormat},
    sha2::{Digest as _, Sha256},
};

/// Placeholder for the three computed ByteRange entries; exactly ten
/// digits so the patched numbers always fit.
const BYTE_RANGE_PLACEHOLDER: i64 = 9_999_999_999;

fn pdf_err(context: &str, err: lopdf::Error) -> SignError {
    SignError::failed(format!("{context}: {err}"))
}

/// Sign a PDF document, returning the full signed document bytes.
pub fn sign_pdf(
    content: &[u8],
    field_label: &str,
    key: &dyn TokenKey,
    cert: &CertificateRecord,
) -> Result<Vec<u8>, SignError> {
    let mut doc =
        Document::load_mem(content).map_err(|e| pdf_err("failed to parse PDF", e))?;

    // Reserve room for the CMS container: certificate, signature,
    // and DER overhead.
    let contents_capacity = cert.der.len() + (key.modulus_bits() as usize / 8) + 2048;

    let sig_id = doc.add_object(dictionary! {
        "Type" => "Sig",
        "Filter" => "Adobe.PPKLite",
        "SubFilter" => "adbe.pkcs7.detached",
        "ByteRange" => Object::Array(vec![
            Object::Integer(0),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
        ]),
        "Contents" => Object::String(vec![0u8; contents_capacity], StringFormat::Hexadecimal),
        "Reason" => Object::String(b"Signed by SignBridge".to_vec(), StringFormat::Literal),
        "Location" => Object::String(b"SignBridge".to_vec(), StringFormat::Literal),
        "M" => Object::String(
            Utc::now().format("D:%Y%m%d%H%M%SZ").to_string().into_bytes(),
            StringFormat::Literal,
        ),
    });

    attach_signature_field(&mut doc, field_label, sig_id)?;

    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| pdf_err("failed to serialize PDF", lopdf::Error::IO(e)))?;

    patch_and_embed(buf, contents_capacity, cert, key)
}

/// Wire the signature dictionary into a form field: reuse an existing
/// signature field with the same name, else append a new widget.
fn attach_signature_field(
    doc: &mut Document,
    field_label: &str,
    sig_id: ObjectId,
) -> Result<(), SignError> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| pdf_err("document has no catalog", e))?;

    // Normalize AcroForm to its own indirect object.
    enum AcroForm {
        Indirect(ObjectId),
        Inline(lopdf::Dictionary),
        Missing,
    }
    let state = {
        let root = doc
            .get_object(root_id)
            .and_then(Object::as_dict)
            .map_err(|e| pdf_err("catalog is not a dictionary", e))?;
        match root.get(b"AcroForm") {
            Ok(Object::Reference(id)) => AcroForm::Indirect(*id),
            Ok(Object::Dictionary(dict)) => AcroForm::Inline(dict.clone()),
            _ => AcroForm::Missing,
        }
    };
    let acroform_id = match state {
        AcroForm::Indirect(id) => id,
        AcroForm::Inline(dict) => doc.add_object(Object::Dictionary(dict)),
        AcroForm::Missing => doc.add_object(dictionary! {
            "Fields" => Object::Array(Vec::new()),
        }),
    };
    doc.get_object_mut(root_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| pdf_err("catalog is not a dictionary", e))?
        .set("AcroForm", Object::Reference(acroform_id));

    // Documents with signature fields must set SigFlags 3
    // (SignaturesExist | AppendOnly).
    doc.get_object_mut(acroform_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| pdf_err("AcroForm is not a dictionary", e))?
        .set("SigFlags", Object::Integer(3));

    if let Some(existing) = find_signature_field(doc, acroform_id, field_label) {
        log::debug!("reusing existing signature field {field_label:?}");
        doc.get_object_mut(existing)
            .and_then(Object::as_dict_mut)
            .map_err(|e| pdf_err("signature field is not a dictionary", e))?
            .set("V", Object::Reference(sig_id));
        return Ok(());
    }

    log::debug!("appending new signature field {field_label:?}");
    let page_id = doc
        .get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| SignError::failed("PDF has no pages"))?;

    let field_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Sig",
        "T" => Object::String(field_label.as_bytes().to_vec(), StringFormat::Literal),
        "Rect" => Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
        ]),
        "F" => Object::Integer(132),
        "P" => Object::Reference(page_id),
        "V" => Object::Reference(sig_id),
    });

    push_into_array(doc, acroform_id, b"Fields", Object::Reference(field_id))?;
    push_into_array(doc, page_id, b"Annots", Object::Reference(field_id))?;
    Ok(())
}

fn find_signature_field(doc: &Document, acroform_id: ObjectId, label: &str) -> Option<ObjectId> {
    let fields = doc
        .get_object(acroform_id)
        .ok()?
        .as_dict()
        .ok()?
        .get(b"Fields")
        .ok()?;
    let field_ids: Vec<ObjectId> = match fields {
        Object::Array(items) => items.iter().filter_map(|o| o.as_reference().ok()).collect(),
        Object::Reference(id) => doc
            .get_object(*id)
            .ok()?
            .as_array()
            .ok()?
            .iter()
            .filter_map(|o| o.as_reference().ok())
            .collect(),
        _ => return None,
    };

    field_ids.into_iter().find(|id| {
        doc.get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .map(|dict| {
                let is_sig = dict
                    .get(b"FT")
                    .and_then(Object::as_name)
                    .map(|n| n == b"Sig")
                    .unwrap_or(false);
                let name_matches = dict
                    .get(b"T")
                    .and_then(Object::as_str)
                    .map(|t| t == label.as_bytes())
                    .unwrap_or(false);
                is_sig && name_matches
            })
            .unwrap_or(false)
    })
}

/// Append to an array entry of a dictionary object, creating the
/// entry if missing and following one level of indirection.
fn push_into_array(
    doc: &mut Document,
    container_id: ObjectId,
    key: &[u8],
    value: Object,
) -> Result<(), SignError> {
    let indirect = {
        let dict = doc
            .get_object(container_id)
            .and_then(Object::as_dict)
            .map_err(|e| pdf_err("container is not a dictionary", e))?;
        match dict.get(key) {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    };

    if let Some(array_id) = indirect {
        doc.get_object_mut(array_id)
            .and_then(Object::as_array_mut)
            .map_err(|e| pdf_err("expected an array", e))?
            .push(value);
        return Ok(());
    }

    let dict = doc
        .get_object_mut(container_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| pdf_err("container is not a dictionary", e))?;
    match dict.get_mut(key) {
        Ok(Object::Array(items)) => items.push(value),
        _ => dict.set(key, Object::Array(vec![value])),
    }
    Ok(())
}

/// Locate the placeholders in the serialized document, fix up
/// `/ByteRange`, digest the signed ranges and embed the CMS DER.
fn patch_and_embed(
    mut buf: Vec<u8>,
    contents_capacity: usize,
    cert: &CertificateRecord,
    key: &dyn TokenKey,
) -> Result<Vec<u8>, SignError> {
    let hex_len = contents_capacity * 2;
    let mut contents_needle = Vec::with_capacity(hex_len + 2);
    contents_needle.push(b'<');
    contents_needle.resize(hex_len + 1, b'0');
    contents_needle.push(b'>');

    let contents_open = find(&buf, &contents_needle)
        .ok_or_else(|| SignError::internal("Contents placeholder not found in output"))?;
    let contents_close = contents_open + 1 + hex_len;

    let range_needle = format!(
        "[0 {BYTE_RANGE_PLACEHOLDER} {BYTE_RANGE_PLACEHOLDER} {BYTE_RANGE_PLACEHOLDER}]"
    )
    .into_bytes();
    let range_at = find(&buf, &range_needle)
        .ok_or_else(|| SignError::internal("ByteRange placeholder not found in output"))?;

    let tail_start = contents_close + 1;
    let mut patched_range = format!(
        "[0 {} {} {}]",
        contents_open,
        tail_start,
        buf.len() - tail_start
    )
    .into_bytes();
    if patched_range.len() > range_needle.len() {
        return Err(SignError::internal("ByteRange does not fit its placeholder"));
    }
    patched_range.resize(range_needle.len(), b' ');
    buf[range_at..range_at + patched_range.len()].copy_from_slice(&patched_range);

    let mut hasher = Sha256::new();
    hasher.update(&buf[..contents_open]);
    hasher.update(&buf[tail_start..]);
    let digest: [u8; 32] = hasher.finalize().into();

    let der = build_detached_pkcs7(&digest, cert, key)?;
    if der.len() > contents_capacity {
        return Err(SignError::internal(format!(
            "signature container too small ({} > {contents_capacity} bytes)",
            der.len()
        )));
    }

    let der_hex = hex::encode(&der).into_bytes();
    buf[contents_open + 1..contents_open + 1 + der_hex.len()].copy_from_slice(&der_hex);

    log::info!("PDF signed ({} bytes, {} byte CMS)", buf.len(), der.len());
    Ok(buf)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
