//! Request validation.
//!
//! Converts the raw JSON envelope into a typed [`SignRequest`] or
//! fails with a single request-level [`ValidationError`]. Validation
//! is side-effect-free and stops at the first failure; error messages
//! name the offending field with its JSON path so callers can fix the
//! request without guessing.
//!
//! Group flattening is *not* done here; see [`super::resolve`].

use {
    super::{
        error::{ErrorCode, ValidationError},
        wire::*,
    },
    crate::conf::{MAX_INLINE_BYTES, PROTOCOL_VERSION},
    serde_json::{Map, Value},
};

/// The `<objectId>` placeholder required in group URL templates.
pub const OBJECT_ID_PLACEHOLDER: &str = "<objectId>";

type Result<T> = std::result::Result<T, ValidationError>;

/// Validate and parse a raw envelope into a [`SignRequest`].
pub fn validate_request(raw: &Value) -> Result<SignRequest> {
    let root = raw
        .as_object()
        .ok_or_else(|| ValidationError::bad_request("request must be a JSON object"))?;

    let protocol_version = match root.get("protocolVersion") {
        Some(Value::String(v)) if !v.is_empty() => v.clone(),
        Some(_) | None => {
            return Err(ValidationError::bad_request(
                "Missing required field: protocolVersion",
            ))
        }
    };
    if protocol_version != PROTOCOL_VERSION {
        return Err(ValidationError::new(
            ErrorCode::UnsupportedVersion,
            format!("Unsupported protocolVersion: {protocol_version}"),
        ));
    }

    let request_id = require_str(root, "requestId", "requestId")?;
    let app_id = require_str(root, "appId", "appId")?;
    let correlation_id = optional_str(root, "correlationId");

    let metadata = match root.get("metadata") {
        None => Value::Object(Map::new()),
        Some(m @ Value::Object(_)) => m.clone(),
        Some(_) => return Err(ValidationError::bad_request("metadata must be an object")),
    };

    let cert_raw = root
        .get("cert")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::bad_request("Missing or invalid cert object"))?;
    let cert = CertSelector {
        cert_id: require_str(cert_raw, "certId", "cert.certId")?,
        label: optional_str(cert_raw, "label"),
    };

    // Exactly one of objects / objectGroups.
    let has_objects = root.contains_key("objects");
    let has_groups = root.contains_key("objectGroups");
    let work = match (has_objects, has_groups) {
        (true, true) => {
            return Err(ValidationError::bad_request(
                "Request must have objects OR objectGroups, not both",
            ))
        }
        (false, false) => {
            return Err(ValidationError::bad_request(
                "Request must have objects or objectGroups",
            ))
        }
        (true, false) => {
            let raw_objects = non_empty_array(root, "objects", "objects")?;
            let objects = raw_objects
                .iter()
                .enumerate()
                .map(|(i, o)| parse_object(o, i))
                .collect::<Result<Vec<_>>>()?;
            WorkList::Objects(objects)
        }
        (false, true) => {
            let raw_groups = non_empty_array(root, "objectGroups", "objectGroups")?;
            let groups = raw_groups
                .iter()
                .enumerate()
                .map(|(i, g)| parse_group(g, i))
                .collect::<Result<Vec<_>>>()?;
            WorkList::Groups(groups)
        }
    };

    Ok(SignRequest {
        protocol_version,
        request_id,
        app_id,
        correlation_id,
        metadata,
        cert,
        work,
    })
}

// == Field helpers ==

fn require_str(obj: &Map<String, Value>, key: &str, label: &str) -> Result<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(ValidationError::bad_request(format!(
            "Missing or empty required field: {label}"
        ))),
    }
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn non_empty_array<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    label: &str,
) -> Result<&'a Vec<Value>> {
    match obj.get(key) {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items),
        _ => Err(ValidationError::bad_request(format!(
            "{label} must be a non-empty array"
        ))),
    }
}

fn parse_headers(obj: &Map<String, Value>, key: &str, label: &str) -> Result<Headers> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Headers::new()),
        Some(Value::Object(raw)) => {
            let mut headers = Headers::new();
            for (name, value) in raw {
                let value = value.as_str().ok_or_else(|| {
                    ValidationError::bad_request(format!(
                        "{label}.{key}.{name} must be a string"
                    ))
                })?;
                headers.insert(name.clone(), value.to_string());
            }
            Ok(headers)
        }
        Some(_) => Err(ValidationError::bad_request(format!(
            "{label}.{key} must be an object"
        ))),
    }
}

fn check_inline_size(content: &str, label: &str) -> Result<()> {
    // Measured in UTF-8 bytes; exactly the cap is still accepted.
    if content.len() > MAX_INLINE_BYTES {
        return Err(ValidationError::bad_request(format!(
            "{label}: inline content exceeds the {MAX_INLINE_BYTES} byte limit"
        )));
    }
    Ok(())
}

fn check_inline_encoding(obj: &Map<String, Value>, label: &str) -> Result<()> {
    match obj.get("encoding") {
        None => Ok(()),
        Some(Value::String(enc)) if enc == "utf8" => Ok(()),
        Some(Value::String(enc)) => Err(ValidationError::bad_request(format!(
            "{label}: unsupported encoding '{enc}'"
        ))),
        Some(_) => Err(ValidationError::bad_request(format!(
            "{label}: encoding must be a string"
        ))),
    }
}

// == Object / group parsing ==

fn parse_data_type(obj: &Map<String, Value>, label: &str) -> Result<DataType> {
    let raw = require_str(obj, "dataType", &format!("{label}.dataType"))?;
    DataType::parse(&raw).ok_or_else(|| {
        ValidationError::new(
            ErrorCode::UnsupportedType,
            format!("{label}: unsupported dataType '{raw}'"),
        )
    })
}

fn parse_content(raw: Option<&Value>, label: &str) -> Result<ContentSource> {
    let obj = raw
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::bad_request(format!("{label}: content must be an object")))?;

    match obj.get("mode").and_then(Value::as_str) {
        Some("inline") => {
            check_inline_encoding(obj, label)?;
            let content = require_str(obj, "content", &format!("{label}.content.content"))?;
            check_inline_size(&content, label)?;
            Ok(ContentSource::Inline { content })
        }
        Some("remote") => Ok(ContentSource::Remote {
            download_url: require_str(obj, "downloadUrl", &format!("{label}.content.downloadUrl"))?,
            http_method: optional_str(obj, "httpMethod").unwrap_or_else(|| "GET".to_string()),
            headers: parse_headers(obj, "headers", &format!("{label}.content"))?,
        }),
        _ => Err(ValidationError::bad_request(format!(
            "{label}: content.mode must be 'inline' or 'remote'"
        ))),
    }
}

fn parse_upload(raw: Option<&Value>, label: &str) -> Result<UploadTarget> {
    let obj = raw
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::bad_request(format!("{label}: upload must be an object")))?;

    let signed_raw = require_str(
        obj,
        "signedContentType",
        &format!("{label}.upload.signedContentType"),
    )?;
    let signed_content_type = SignedContentType::parse(&signed_raw).ok_or_else(|| {
        ValidationError::bad_request(format!(
            "{label}.upload: unsupported signedContentType '{signed_raw}'"
        ))
    })?;

    Ok(UploadTarget {
        upload_url: require_str(obj, "uploadUrl", &format!("{label}.upload.uploadUrl"))?,
        http_method: optional_str(obj, "httpMethod").unwrap_or_else(|| "POST".to_string()),
        headers: parse_headers(obj, "headers", &format!("{label}.upload"))?,
        signed_content_type,
    })
}

fn parse_callbacks(raw: Option<&Value>, label: &str) -> Result<CallbackTargets> {
    let obj = raw.and_then(Value::as_object).ok_or_else(|| {
        ValidationError::bad_request(format!("{label}: callbacks must be an object"))
    })?;

    Ok(CallbackTargets {
        on_success: require_str(obj, "onSuccess", &format!("{label}.callbacks.onSuccess"))?,
        on_error: require_str(obj, "onError", &format!("{label}.callbacks.onError"))?,
        progress: optional_str(obj, "progress"),
        headers: parse_headers(obj, "headers", &format!("{label}.callbacks"))?,
    })
}

fn parse_pdf_options(raw: Option<&Value>, data_type: DataType, label: &str) -> Result<Option<PdfOptions>> {
    if data_type != DataType::Pdf {
        return Ok(None);
    }
    let obj = raw.and_then(Value::as_object).ok_or_else(|| {
        ValidationError::bad_request(format!(
            "{label}: pdfOptions required when dataType is 'pdf'"
        ))
    })?;
    Ok(Some(PdfOptions {
        label: require_str(obj, "label", &format!("{label}.pdfOptions.label"))?,
    }))
}

fn parse_xml_options(raw: Option<&Value>, data_type: DataType, label: &str) -> Result<Option<XmlOptions>> {
    if data_type != DataType::Xml {
        return Ok(None);
    }
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let obj = v.as_object().ok_or_else(|| {
                ValidationError::bad_request(format!("{label}: xmlOptions must be an object"))
            })?;
            Ok(Some(XmlOptions {
                xpath: require_str(obj, "xpath", &format!("{label}.xmlOptions.xpath"))?,
                id_attribute: optional_str(obj, "idAttribute"),
            }))
        }
    }
}

fn parse_object(raw: &Value, idx: usize) -> Result<SignObject> {
    let label = format!("objects[{idx}]");
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::bad_request(format!("{label} must be an object")))?;

    let id = require_str(obj, "id", &format!("{label}.id"))?;
    let data_type = parse_data_type(obj, &label)?;
    let content = parse_content(obj.get("content"), &label)?;

    if data_type.remote_only() && matches!(content, ContentSource::Inline { .. }) {
        return Err(ValidationError::bad_request(format!(
            "{label}: dataType '{data_type}' requires mode 'remote', got 'inline'"
        )));
    }

    Ok(SignObject {
        id,
        data_type,
        content,
        upload: parse_upload(obj.get("upload"), &label)?,
        callbacks: parse_callbacks(obj.get("callbacks"), &label)?,
        pdf_options: parse_pdf_options(obj.get("pdfOptions"), data_type, &label)?,
        xml_options: parse_xml_options(obj.get("xmlOptions"), data_type, &label)?,
    })
}

fn parse_group(raw: &Value, idx: usize) -> Result<ObjectGroup> {
    let label = format!("objectGroups[{idx}]");
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::bad_request(format!("{label} must be an object")))?;

    let data_type = parse_data_type(obj, &label)?;

    let mode = require_str(obj, "mode", &format!("{label}.mode"))?;
    if mode != "inline" && mode != "remote" {
        return Err(ValidationError::bad_request(format!(
            "{label}: mode must be 'inline' or 'remote'"
        )));
    }
    if data_type.remote_only() && mode == "inline" {
        return Err(ValidationError::bad_request(format!(
            "{label}: dataType '{data_type}' requires mode 'remote'"
        )));
    }

    let raw_objects = non_empty_array(obj, "objects", &format!("{label}.objects"))?;

    let objects = if mode == "inline" {
        let mut members = Vec::with_capacity(raw_objects.len());
        for (j, ro) in raw_objects.iter().enumerate() {
            let olabel = format!("{label}.objects[{j}]");
            let inner = ro
                .as_object()
                .ok_or_else(|| ValidationError::bad_request(format!("{olabel} must be an object")))?;
            let id = require_str(inner, "id", &format!("{olabel}.id"))?;
            let content = inner.get("content").and_then(Value::as_object).ok_or_else(|| {
                ValidationError::bad_request(format!(
                    "{olabel}: content is required for inline mode"
                ))
            })?;
            check_inline_encoding(content, &olabel)?;
            let value = require_str(content, "value", &format!("{olabel}.content.value"))?;
            check_inline_size(&value, &olabel)?;
            members.push(GroupInlineObject { id, value });
        }
        GroupObjects::Inline(members)
    } else {
        let download_url = require_str(obj, "downloadUrl", &format!("{label}.downloadUrl"))?;
        if !download_url.contains(OBJECT_ID_PLACEHOLDER) {
            return Err(ValidationError::bad_request(format!(
                "{label}: downloadUrl must contain {OBJECT_ID_PLACEHOLDER} placeholder"
            )));
        }
        let download_headers = parse_headers(obj, "downloadHeaders", &label)?;

        let mut members = Vec::with_capacity(raw_objects.len());
        for (j, ro) in raw_objects.iter().enumerate() {
            let olabel = format!("{label}.objects[{j}]");
            let inner = ro
                .as_object()
                .ok_or_else(|| ValidationError::bad_request(format!("{olabel} must be an object")))?;
            members.push(GroupRemoteObject {
                id: require_str(inner, "id", &format!("{olabel}.id"))?,
            });
        }
        GroupObjects::Remote {
            download_url,
            download_headers,
            objects: members,
        }
    };

    Ok(ObjectGroup {
        data_type,
        upload: parse_upload(obj.get("upload"), &label)?,
        callbacks: parse_callbacks(obj.get("callbacks"), &label)?,
        pdf_options: parse_pdf_options(obj.get("pdfOptions"), data_type, &label)?,
        xml_options: parse_xml_options(obj.get("xmlOptions"), data_type, &label)?,
        objects,
    })
}
