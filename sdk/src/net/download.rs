//! Content download.
//!
//! The download endpoint must return the raw bytes directly, not
//! wrapped in JSON.

use {
    super::{apply_headers, parse_method, truncate_utf8},
    crate::{
        conf::{redact_url, HTTP_TIMEOUT_DOWNLOAD},
        protocol::{error::ErrorCode, wire::Headers},
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct DownloadError {
    pub code: ErrorCode,
    pub message: String,
}

impl DownloadError {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::DownloadFailed,
            message: message.into(),
        }
    }
}

/// Download raw content. Single attempt, 60 second timeout.
pub async fn download_content(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    headers: &Headers,
) -> Result<Vec<u8>, DownloadError> {
    log::info!("downloading content: {} {}", method, redact_url(url));

    let method = parse_method(method)
        .ok_or_else(|| DownloadError::failed(format!("invalid HTTP method '{method}'")))?;

    let builder = apply_headers(client.request(method, url), headers).timeout(HTTP_TIMEOUT_DOWNLOAD);

    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            DownloadError {
                code: ErrorCode::Timeout,
                message: format!(
                    "Download timed out after {}s: {}",
                    HTTP_TIMEOUT_DOWNLOAD.as_secs(),
                    redact_url(url)
                ),
            }
        } else {
            DownloadError::failed(format!("Connection error: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let snippet = truncate_utf8(&response.text().await.unwrap_or_default(), 200);
        return Err(DownloadError::failed(format!(
            "HTTP {} from downloadUrl: {snippet}",
            status.as_u16()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| DownloadError::failed(format!("Download failed: {e}")))?;

    log::info!("download complete: {} bytes", body.len());
    Ok(body.to_vec())
}
