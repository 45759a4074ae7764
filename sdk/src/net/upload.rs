//! Signed-artifact upload.
//!
//! The signed content is sent as raw bytes; `Content-Type` comes from
//! the declared `signedContentType`, overriding any caller header of
//! the same name. The endpoint's response body is captured verbatim
//! (up to 4 KiB) for the success callback and the response envelope.

use {
    super::{apply_headers, parse_method, truncate_utf8},
    crate::{
        conf::{redact_url, HTTP_TIMEOUT_UPLOAD, UPLOAD_BODY_CAPTURE_BYTES},
        protocol::{
            error::ErrorCode,
            wire::{Headers, SignedContentType, UploadResult},
        },
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct UploadError {
    pub code: ErrorCode,
    pub message: String,
}

impl UploadError {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::UploadFailed,
            message: message.into(),
        }
    }
}

/// Upload signed content. Single attempt, 120 second timeout.
pub async fn upload_signed_content(
    client: &reqwest::Client,
    url: &str,
    data: Vec<u8>,
    signed_content_type: SignedContentType,
    method: &str,
    headers: &Headers,
) -> Result<UploadResult, UploadError> {
    let content_type = signed_content_type.mime();
    log::info!(
        "uploading signed content: {} {} ({} bytes, {content_type})",
        method,
        redact_url(url),
        data.len()
    );

    let method = parse_method(method)
        .ok_or_else(|| UploadError::failed(format!("invalid HTTP method '{method}'")))?;

    let builder = apply_headers(client.request(method, url), headers)
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .timeout(HTTP_TIMEOUT_UPLOAD)
        .body(data);

    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            UploadError {
                code: ErrorCode::Timeout,
                message: format!(
                    "Upload timed out after {}s: {}",
                    HTTP_TIMEOUT_UPLOAD.as_secs(),
                    redact_url(url)
                ),
            }
        } else {
            UploadError::failed(format!("Connection error: {e}"))
        }
    })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(UploadError::failed(format!(
            "Upload returned HTTP {}: {}",
            status.as_u16(),
            truncate_utf8(&body, 200)
        )));
    }

    log::info!("upload complete: HTTP {}", status.as_u16());
    Ok(UploadResult {
        status_code: status.as_u16(),
        response_body: truncate_utf8(&body, UPLOAD_BODY_CAPTURE_BYTES),
    })
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Server, rstest::rstest};

    #[rstest]
    #[case(SignedContentType::String, "text/plain")]
    #[case(SignedContentType::Pdf, "application/pdf")]
    #[case(SignedContentType::Xml, "application/xml")]
    #[case(SignedContentType::Binary, "application/octet-stream")]
    #[tokio::test]
    async fn content_type_follows_declared_mapping(
        #[case] sct: SignedContentType,
        #[case] mime: &str,
    ) {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/sig/A")
            .match_header("content-type", mime)
            .with_status(200)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        upload_signed_content(
            &client,
            &format!("{}/sig/A", server.url()),
            b"signed".to_vec(),
            sct,
            "POST",
            &Headers::new(),
        )
        .await
        .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn captures_response_body_verbatim() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/sig/A")
            .with_status(201)
            .with_body(r#"{"stored":true}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let result = upload_signed_content(
            &client,
            &format!("{}/sig/A", server.url()),
            b"signed".to_vec(),
            SignedContentType::String,
            "PUT",
            &Headers::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.status_code, 201);
        assert_eq!(result.response_body, r#"{"stored":true}"#);
    }

    #[tokio::test]
    async fn response_body_is_truncated_to_capture_cap() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/sig/A")
            .with_status(200)
            .with_body("y".repeat(UPLOAD_BODY_CAPTURE_BYTES + 100))
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let result = upload_signed_content(
            &client,
            &format!("{}/sig/A", server.url()),
            Vec::new(),
            SignedContentType::Binary,
            "POST",
            &Headers::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.response_body.len(), UPLOAD_BODY_CAPTURE_BYTES);
    }

    #[tokio::test]
    async fn non_2xx_is_upload_failed() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/sig/A")
            .with_status(403)
            .with_body("denied")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let err = upload_signed_content(
            &client,
            &format!("{}/sig/A", server.url()),
            Vec::new(),
            SignedContentType::String,
            "POST",
            &Headers::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code, ErrorCode::UploadFailed);
        assert!(err.message.contains("HTTP 403"));
    }

    #[tokio::test]
    async fn declared_content_type_overrides_caller_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/sig/A")
            .match_header("content-type", "application/pdf")
            .with_status(200)
            .create_async()
            .await;

        let headers = Headers::from([("Content-Type".to_string(), "text/html".to_string())]);
        let client = reqwest::Client::new();
        upload_signed_content(
            &client,
            &format!("{}/sig/A", server.url()),
            Vec::new(),
            SignedContentType::Pdf,
            "POST",
            &headers,
        )
        .await
        .unwrap();

        mock.assert_async().await;
    }
}
