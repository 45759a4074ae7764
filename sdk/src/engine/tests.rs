//! End-to-end pipeline scenarios over mock HTTP endpoints, with the
//! token key replaced by a deterministic fake.

use {
    super::{response::request_error_response, *},
    crate::{
        protocol::{
            error::ErrorCode,
            resolve::resolve,
            validate::validate_request,
            wire::ResponseStatus,
        },
        sign::TokenObjectSigner,
        test_support::{make_cert_der, FakeKey, FAKE_SIGNATURE},
        token::certificate::CertificateRecord,
    },
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    mockito::{Matcher, Server, ServerGuard},
    serde_json::{json, Value},
};

fn signer() -> TokenObjectSigner<FakeKey> {
    let cert = CertificateRecord::from_der(make_cert_der(0xABC123, true), None).unwrap();
    TokenObjectSigner::new(FakeKey, cert)
}

fn inline_text_object(server: &ServerGuard, id: &str, content: &str) -> Value {
    json!({
        "id": id,
        "dataType": "text",
        "content": {"mode": "inline", "encoding": "utf8", "content": content},
        "upload": {
            "uploadUrl": format!("{}/sig/{id}", server.url()),
            "httpMethod": "PUT",
            "signedContentType": "string"
        },
        "callbacks": {
            "onSuccess": format!("{}/cb/ok", server.url()),
            "onError": format!("{}/cb/err", server.url())
        }
    })
}

fn remote_text_object(server: &ServerGuard, id: &str) -> Value {
    let mut object = inline_text_object(server, id, "");
    object["content"] = json!({
        "mode": "remote",
        "downloadUrl": format!("{}/doc/{id}", server.url())
    });
    object
}

fn request_with_objects(objects: Vec<Value>) -> Value {
    json!({
        "protocolVersion": "1.0",
        "requestId": "req-1",
        "appId": "example.org",
        "metadata": {"batch": "b-77"},
        "cert": {"certId": "ABC123"},
        "objects": objects
    })
}

async fn run_pipeline(raw: &Value, cancel: CancelFlag, observer: Option<&dyn ProgressObserver>) -> crate::protocol::wire::SignResponse {
    let request = validate_request(raw).unwrap();
    let objects = resolve(&request);
    let client = reqwest::Client::new();
    let signer = signer();
    let pipeline = Pipeline {
        http: &client,
        signer: &signer,
        cancel,
        observer,
    };
    pipeline.run(&request, &objects).await
}

// S1: one inline text object, signed and uploaded, success callback
// carries the upload endpoint's response body verbatim.
#[tokio::test]
async fn text_round_trip() {
    let mut server = Server::new_async().await;
    let expected_payload = BASE64.encode(FAKE_SIGNATURE);

    let upload = server
        .mock("PUT", "/sig/A")
        .match_header("content-type", "text/plain")
        .match_body(Matcher::Exact(expected_payload))
        .with_status(200)
        .with_body("stored-ok")
        .create_async()
        .await;
    let success = server
        .mock("POST", "/cb/ok")
        .match_body(Matcher::PartialJson(json!({
            "objectId": "A",
            "requestId": "req-1",
            "status": "completed",
            "uploadResult": {"statusCode": 200, "responseBody": "stored-ok"},
            "metadata": {"batch": "b-77"},
        })))
        .with_status(200)
        .create_async()
        .await;

    let raw = request_with_objects(vec![inline_text_object(&server, "A", "hello")]);
    let response = run_pipeline(&raw, CancelFlag::new(), None).await;

    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].upload_result.response_body, "stored-ok");
    assert_eq!(response.results[0].callback_result.endpoint, "onSuccess");
    assert!(response.errors.is_empty());
    assert!(response.metrics.is_some());

    upload.assert_async().await;
    success.assert_async().await;
}

// S2: a remote group with <objectId> templating fans out to one
// download and one upload per member, results in declaration order.
#[tokio::test]
async fn group_with_templating() {
    let mut server = Server::new_async().await;

    let mut transfer_mocks = Vec::new();
    for id in ["A", "B"] {
        transfer_mocks.push(
            server
                .mock("GET", format!("/doc/{id}").as_str())
                .with_status(200)
                .with_body(format!("document {id}"))
                .create_async()
                .await,
        );
        transfer_mocks.push(
            server
                .mock("PUT", format!("/sig/{id}").as_str())
                .with_status(200)
                .with_body("stored")
                .create_async()
                .await,
        );
    }
    let success = server
        .mock("POST", "/cb/ok")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let raw = json!({
        "protocolVersion": "1.0",
        "requestId": "req-2",
        "appId": "example.org",
        "cert": {"certId": "ABC123"},
        "objectGroups": [{
            "dataType": "text",
            "mode": "remote",
            "downloadUrl": format!("{}/doc/<objectId>", server.url()),
            "upload": {
                "uploadUrl": format!("{}/sig/<objectId>", server.url()),
                "httpMethod": "PUT",
                "signedContentType": "string"
            },
            "callbacks": {
                "onSuccess": format!("{}/cb/ok", server.url()),
                "onError": format!("{}/cb/err", server.url())
            },
            "objects": [{"id": "A"}, {"id": "B"}]
        }]
    });
    let response = run_pipeline(&raw, CancelFlag::new(), None).await;

    assert_eq!(response.status, ResponseStatus::Ok);
    let ids: Vec<_> = response.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["A", "B"]);

    for mock in &transfer_mocks {
        mock.assert_async().await;
    }
    success.assert_async().await;
}

// S3: the middle object's download fails; its siblings complete, the
// envelope is partial, and exactly one callback fires per object.
#[tokio::test]
async fn partial_failure_continues_with_siblings() {
    let mut server = Server::new_async().await;

    let mut transfer_mocks = Vec::new();
    for id in ["A", "C"] {
        transfer_mocks.push(
            server
                .mock("GET", format!("/doc/{id}").as_str())
                .with_status(200)
                .with_body("doc")
                .create_async()
                .await,
        );
        transfer_mocks.push(
            server
                .mock("PUT", format!("/sig/{id}").as_str())
                .with_status(200)
                .create_async()
                .await,
        );
    }
    let failed_download = server
        .mock("GET", "/doc/B")
        .with_status(500)
        .with_body("backend exploded")
        .create_async()
        .await;

    let success = server
        .mock("POST", "/cb/ok")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;
    let error = server
        .mock("POST", "/cb/err")
        .match_body(Matcher::PartialJson(json!({
            "objectId": "B",
            "status": "failed",
            "error": {"code": "DOWNLOAD_FAILED"},
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let raw = request_with_objects(vec![
        remote_text_object(&server, "A"),
        remote_text_object(&server, "B"),
        remote_text_object(&server, "C"),
    ]);
    let response = run_pipeline(&raw, CancelFlag::new(), None).await;

    assert_eq!(response.status, ResponseStatus::Partial);
    let ids: Vec<_> = response.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["A", "C"]);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].id.as_deref(), Some("B"));
    assert_eq!(response.errors[0].code, ErrorCode::DownloadFailed);

    failed_download.assert_async().await;
    success.assert_async().await;
    error.assert_async().await;
}

// S4: cancellation after the first object completes marks the current
// and all remaining objects CANCELLED_BY_USER, with error callbacks.
struct CancelWhenSeen {
    cancel: CancelFlag,
    trigger: String,
}

impl ProgressObserver for CancelWhenSeen {
    fn object_progress(&self, object_id: &str, _percent: u8, _message: &str) {
        if object_id == self.trigger {
            self.cancel.cancel();
        }
    }
}

#[tokio::test]
async fn cancellation_marks_current_and_remaining_objects() {
    let mut server = Server::new_async().await;

    let download = server
        .mock("GET", "/doc/A")
        .with_status(200)
        .with_body("doc")
        .create_async()
        .await;
    let upload = server
        .mock("PUT", "/sig/A")
        .with_status(200)
        .create_async()
        .await;
    let success = server
        .mock("POST", "/cb/ok")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let errors = server
        .mock("POST", "/cb/err")
        .match_body(Matcher::PartialJson(json!({
            "error": {"code": "CANCELLED_BY_USER"},
        })))
        .with_status(200)
        .expect(3)
        .create_async()
        .await;

    let raw = request_with_objects(vec![
        remote_text_object(&server, "A"),
        remote_text_object(&server, "B"),
        remote_text_object(&server, "C"),
        remote_text_object(&server, "D"),
    ]);

    let cancel = CancelFlag::new();
    let observer = CancelWhenSeen {
        cancel: cancel.clone(),
        trigger: "B".to_string(),
    };
    let response = run_pipeline(&raw, cancel, Some(&observer)).await;

    assert_eq!(response.status, ResponseStatus::Partial);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "A");

    let cancelled: Vec<_> = response
        .errors
        .iter()
        .map(|e| (e.id.as_deref().unwrap(), e.code))
        .collect();
    assert_eq!(
        cancelled,
        [
            ("B", ErrorCode::CancelledByUser),
            ("C", ErrorCode::CancelledByUser),
            ("D", ErrorCode::CancelledByUser),
        ]
    );

    download.assert_async().await;
    upload.assert_async().await;
    success.assert_async().await;
    errors.assert_async().await;
}

// A non-2xx progress answer cancels that object's signing only.
#[tokio::test]
async fn progress_rejection_cancels_that_object_only() {
    let mut server = Server::new_async().await;

    let progress = server
        .mock("POST", "/cb/progress")
        .with_status(409)
        .create_async()
        .await;
    let _download = server
        .mock("GET", "/doc/B")
        .with_status(200)
        .with_body("doc")
        .create_async()
        .await;
    let _upload = server
        .mock("PUT", "/sig/B")
        .with_status(200)
        .create_async()
        .await;
    let success = server
        .mock("POST", "/cb/ok")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let error = server
        .mock("POST", "/cb/err")
        .match_body(Matcher::PartialJson(json!({
            "objectId": "A",
            "error": {"code": "PROGRESS_ENDPOINT_FAILED"},
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut first = remote_text_object(&server, "A");
    first["callbacks"]["progress"] = json!(format!("{}/cb/progress", server.url()));
    let raw = request_with_objects(vec![first, remote_text_object(&server, "B")]);

    let response = run_pipeline(&raw, CancelFlag::new(), None).await;

    assert_eq!(response.status, ResponseStatus::Partial);
    assert_eq!(response.results[0].id, "B");
    assert_eq!(response.errors[0].code, ErrorCode::ProgressEndpointFailed);

    progress.assert_async().await;
    success.assert_async().await;
    error.assert_async().await;
}

// S5's callback side: a request-level failure fans one error callback
// out to every resolved object.
#[tokio::test]
async fn request_error_fans_out_to_every_object() {
    let mut server = Server::new_async().await;
    let errors = server
        .mock("POST", "/cb/err")
        .match_body(Matcher::PartialJson(json!({
            "status": "failed",
            "error": {"code": "CERT_NOT_FOUND"},
        })))
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let raw = request_with_objects(vec![
        inline_text_object(&server, "A", "x"),
        inline_text_object(&server, "B", "y"),
    ]);
    let request = validate_request(&raw).unwrap();
    let objects = resolve(&request);

    let client = reqwest::Client::new();
    fan_out_request_error(
        &client,
        &request,
        &objects,
        ErrorCode::CertNotFound,
        "Certificate not found on token: ABC123",
    )
    .await;

    let response = request_error_response(
        Some(&request.request_id),
        ErrorCode::CertNotFound,
        "Certificate not found on token: ABC123",
        Some(&request.metadata),
    );
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.results.is_empty());

    errors.assert_async().await;
}
