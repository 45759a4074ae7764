//! Callback delivery.
//!
//! The host POSTs JSON status updates to the caller's `progress`,
//! `onSuccess` and `onError` endpoints. Success and error callbacks
//! are fire-and-forget: failures are logged and swallowed. Progress
//! is different: a non-2xx answer from the progress endpoint cancels
//! signing for that object, so it surfaces as an error.

use {
    super::{apply_headers, truncate_utf8},
    crate::{
        conf::{redact_url, HTTP_TIMEOUT_CALLBACK},
        protocol::{
            error::ErrorCode,
            wire::{
                CallbackErrorBody, ErrorPayload, Headers, ProgressPayload, SuccessPayload,
                UploadResult,
            },
        },
    },
    chrono::Utc,
    serde::Serialize,
    thiserror::Error,
};

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct CallbackError {
    pub code: ErrorCode,
    pub message: String,
}

/// Current UTC timestamp, ISO 8601 with a `Z` suffix.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

async fn post_json<P: Serialize>(
    client: &reqwest::Client,
    url: &str,
    headers: &Headers,
    payload: &P,
) -> Result<reqwest::Response, reqwest::Error> {
    apply_headers(client.post(url), headers)
        .timeout(HTTP_TIMEOUT_CALLBACK)
        .json(payload)
        .send()
        .await
}

/// POST a progress update. Errors (transport or non-2xx) cancel the
/// object, per protocol.
#[allow(clippy::too_many_arguments)]
pub async fn send_progress(
    client: &reqwest::Client,
    url: &str,
    headers: &Headers,
    object_id: &str,
    request_id: &str,
    status: &'static str,
    percent_complete: u8,
    message: &str,
    metadata: &serde_json::Value,
) -> Result<(), CallbackError> {
    let payload = ProgressPayload {
        object_id,
        request_id,
        status,
        percent_complete,
        message,
        metadata,
    };

    log::debug!("progress callback: {object_id} {percent_complete}% - {message}");

    let response = post_json(client, url, headers, &payload)
        .await
        .map_err(|e| CallbackError {
            code: ErrorCode::ProgressEndpointFailed,
            message: format!("Progress callback failed: {e}"),
        })?;

    let status_code = response.status();
    if !status_code.is_success() {
        let snippet = truncate_utf8(&response.text().await.unwrap_or_default(), 200);
        return Err(CallbackError {
            code: ErrorCode::ProgressEndpointFailed,
            message: format!(
                "Progress endpoint returned HTTP {}: {snippet}",
                status_code.as_u16()
            ),
        });
    }
    Ok(())
}

/// POST the success callback. Returns the timestamp it carried.
/// Delivery failures are logged but never fail the object.
pub async fn send_success(
    client: &reqwest::Client,
    url: &str,
    headers: &Headers,
    object_id: &str,
    request_id: &str,
    upload_result: &UploadResult,
    metadata: &serde_json::Value,
) -> String {
    let timestamp = now_iso();
    let payload = SuccessPayload {
        object_id,
        request_id,
        status: "completed",
        upload_result,
        timestamp: &timestamp,
        metadata,
    };

    log::info!("success callback: {object_id} -> {}", redact_url(url));

    match post_json(client, url, headers, &payload).await {
        Ok(response) if !response.status().is_success() => {
            log::warn!(
                "success callback returned HTTP {} (non-fatal)",
                response.status().as_u16()
            );
        }
        Ok(_) => {}
        Err(e) => log::warn!("success callback failed (non-fatal): {e}"),
    }

    timestamp
}

/// POST the error callback. Returns the timestamp it carried.
/// Delivery failures are logged but never propagate.
pub async fn send_error(
    client: &reqwest::Client,
    url: &str,
    headers: &Headers,
    object_id: &str,
    request_id: &str,
    code: ErrorCode,
    message: &str,
    metadata: &serde_json::Value,
) -> String {
    let timestamp = now_iso();
    let payload = ErrorPayload {
        object_id,
        request_id,
        status: "failed",
        error: CallbackErrorBody { code, message },
        timestamp: &timestamp,
        metadata,
    };

    log::info!("error callback: {object_id} - {code}: {message}");

    match post_json(client, url, headers, &payload).await {
        Ok(response) if !response.status().is_success() => {
            log::warn!(
                "error callback returned HTTP {} (non-fatal)",
                response.status().as_u16()
            );
        }
        Ok(_) => {}
        Err(e) => log::warn!("error callback failed (non-fatal): {e}"),
    }

    timestamp
}
