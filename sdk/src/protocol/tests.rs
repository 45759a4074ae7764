use {
    super::{error::ErrorCode, resolve::*, validate::*, wire::*},
    crate::conf::MAX_INLINE_BYTES,
    rstest::rstest,
    serde_json::{json, Value},
};

fn text_object(id: &str) -> Value {
    json!({
        "id": id,
        "dataType": "text",
        "content": {"mode": "inline", "encoding": "utf8", "content": "hello"},
        "upload": {
            "uploadUrl": format!("https://h/sig/{id}"),
            "httpMethod": "PUT",
            "signedContentType": "string"
        },
        "callbacks": {
            "onSuccess": "https://h/cb/ok",
            "onError": "https://h/cb/err"
        }
    })
}

fn base_request() -> Value {
    json!({
        "protocolVersion": "1.0",
        "requestId": "req-1",
        "appId": "example.org",
        "metadata": {"batch": "b-77"},
        "cert": {"certId": "ABC123"},
        "objects": [text_object("A")]
    })
}

fn remote_group_request() -> Value {
    json!({
        "protocolVersion": "1.0",
        "requestId": "req-2",
        "appId": "example.org",
        "cert": {"certId": "ABC123"},
        "objectGroups": [{
            "dataType": "pdf",
            "mode": "remote",
            "downloadUrl": "https://h/doc/<objectId>",
            "downloadHeaders": {"Authorization": "Bearer t"},
            "pdfOptions": {"label": "Signature1"},
            "upload": {
                "uploadUrl": "https://h/sig/<objectId>",
                "signedContentType": "pdf"
            },
            "callbacks": {
                "onSuccess": "https://h/cb/ok",
                "onError": "https://h/cb/err",
                "progress": "https://h/cb/progress"
            },
            "objects": [{"id": "A"}, {"id": "B"}]
        }]
    })
}

// == Validation ==

#[test]
fn valid_request_parses() {
    let request = validate_request(&base_request()).unwrap();

    assert_eq!(request.request_id, "req-1");
    assert_eq!(request.app_id, "example.org");
    assert_eq!(request.cert.cert_id, "ABC123");
    assert_eq!(request.metadata, json!({"batch": "b-77"}));

    let WorkList::Objects(objects) = &request.work else {
        panic!("expected objects work list");
    };
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].data_type, DataType::Text);
    assert_eq!(objects[0].upload.http_method, "PUT");
}

#[test]
fn missing_protocol_version_is_bad_request() {
    let mut raw = base_request();
    raw.as_object_mut().unwrap().remove("protocolVersion");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
}

#[test]
fn protocol_version_mismatch_is_rejected() {
    let mut raw = base_request();
    raw["protocolVersion"] = json!("2.0");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedVersion);
    assert!(err.message.contains("2.0"));
}

#[test]
fn objects_and_groups_together_are_rejected() {
    let mut raw = base_request();
    raw["objectGroups"] = json!([]);

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("not both"));
}

#[test]
fn neither_objects_nor_groups_is_rejected() {
    let mut raw = base_request();
    raw.as_object_mut().unwrap().remove("objects");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
}

#[test]
fn unknown_data_type_is_unsupported_type() {
    let mut raw = base_request();
    raw["objects"][0]["dataType"] = json!("docx");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedType);
    assert!(err.message.contains("docx"));
}

#[test]
fn empty_request_id_is_rejected() {
    let mut raw = base_request();
    raw["requestId"] = json!("");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("requestId"));
}

#[rstest]
#[case("pdf")]
#[case("binary")]
fn inline_content_rejected_for_remote_only_types(#[case] data_type: &str) {
    let mut raw = base_request();
    raw["objects"][0]["dataType"] = json!(data_type);
    if data_type == "pdf" {
        raw["objects"][0]["pdfOptions"] = json!({"label": "Sig"});
    }

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("requires mode 'remote'"));
}

#[test]
fn pdf_requires_pdf_options() {
    let mut raw = remote_group_request();
    raw["objectGroups"][0].as_object_mut().unwrap().remove("pdfOptions");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("pdfOptions"));
}

#[test]
fn group_download_url_requires_placeholder() {
    let mut raw = remote_group_request();
    raw["objectGroups"][0]["downloadUrl"] = json!("https://h/doc/fixed");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("<objectId>"));
}

#[test]
fn inline_payload_at_cap_is_accepted() {
    let mut raw = base_request();
    raw["objects"][0]["content"]["content"] = json!("x".repeat(MAX_INLINE_BYTES));

    assert!(validate_request(&raw).is_ok());
}

#[test]
fn inline_payload_over_cap_is_rejected() {
    let mut raw = base_request();
    raw["objects"][0]["content"]["content"] = json!("x".repeat(MAX_INLINE_BYTES + 1));

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("byte limit"));
}

#[test]
fn unknown_inline_encoding_is_rejected() {
    let mut raw = base_request();
    raw["objects"][0]["content"]["encoding"] = json!("base85");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("base85"));
}

#[test]
fn metadata_must_be_an_object() {
    let mut raw = base_request();
    raw["metadata"] = json!("not-an-object");

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("metadata"));
}

#[test]
fn xml_options_xpath_required_when_present() {
    let mut raw = base_request();
    raw["objects"][0]["dataType"] = json!("xml");
    raw["objects"][0]["xmlOptions"] = json!({"idAttribute": "Id"});

    let err = validate_request(&raw).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("xpath"));
}

// == Resolution ==

#[test]
fn resolves_objects_in_declaration_order() {
    let mut raw = base_request();
    raw["objects"] = json!([text_object("one"), text_object("two"), text_object("three")]);

    let request = validate_request(&raw).unwrap();
    let resolved = resolve(&request);

    let ids: Vec<_> = resolved.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["one", "two", "three"]);
}

#[test]
fn resolved_objects_have_exactly_one_source() {
    let request = validate_request(&remote_group_request()).unwrap();
    for obj in resolve(&request) {
        assert!(obj.inline_content.is_some() != obj.download_url.is_some());
    }

    let request = validate_request(&base_request()).unwrap();
    for obj in resolve(&request) {
        assert!(obj.inline_content.is_some() != obj.download_url.is_some());
    }
}

#[test]
fn group_resolution_substitutes_both_templates() {
    let request = validate_request(&remote_group_request()).unwrap();
    let resolved = resolve(&request);

    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0].download_url.as_deref(), Some("https://h/doc/A"));
    assert_eq!(resolved[0].upload_url, "https://h/sig/A");
    assert_eq!(resolved[1].download_url.as_deref(), Some("https://h/doc/B"));
    assert_eq!(resolved[1].upload_url, "https://h/sig/B");
}

#[test]
fn group_fields_are_copied_onto_every_member() {
    let request = validate_request(&remote_group_request()).unwrap();
    for obj in resolve(&request) {
        assert_eq!(obj.data_type, DataType::Pdf);
        assert_eq!(obj.pdf_label.as_deref(), Some("Signature1"));
        assert_eq!(obj.progress.as_deref(), Some("https://h/cb/progress"));
        assert_eq!(
            obj.download_headers.get("Authorization").map(String::as_str),
            Some("Bearer t")
        );
        assert_eq!(obj.signed_content_type, SignedContentType::Pdf);
    }
}

#[test]
fn substitution_is_exact_textual_replacement() {
    // Not URL-encoded: ids with reserved characters pass through as-is.
    assert_eq!(
        substitute_object_id("https://h/doc/<objectId>", "a/b c"),
        "https://h/doc/a/b c"
    );
}

#[test]
fn resolver_output_length_matches_inner_object_count() {
    let mut raw = remote_group_request();
    let second_group = raw["objectGroups"][0].clone();
    raw["objectGroups"].as_array_mut().unwrap().push(second_group);
    raw["objectGroups"][1]["objects"] = json!([{"id": "C"}, {"id": "D"}, {"id": "E"}]);

    let request = validate_request(&raw).unwrap();
    assert_eq!(resolve(&request).len(), 5);
}
