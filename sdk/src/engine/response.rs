//! Response envelope assembly.
//!
//! Accumulates per-object results and errors as the pipeline runs and
//! derives the overall status: `ok` when nothing failed, `error` when
//! nothing succeeded, `partial` otherwise.

use {
    crate::{
        conf::PROTOCOL_VERSION,
        protocol::{
            error::ErrorCode,
            wire::{Metrics, ObjectError, ObjectResult, ResponseStatus, SignResponse},
        },
    },
    serde_json::Value,
    std::time::Instant,
};

pub struct ResponseBuilder {
    request_id: String,
    metadata: Value,
    results: Vec<ObjectResult>,
    errors: Vec<ObjectError>,
    started: Instant,
}

impl ResponseBuilder {
    pub fn new(request_id: impl Into<String>, metadata: Value) -> Self {
        Self {
            request_id: request_id.into(),
            metadata,
            results: Vec::new(),
            errors: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn add_result(&mut self, result: ObjectResult) {
        self.results.push(result);
    }

    pub fn add_error(&mut self, object_id: &str, code: ErrorCode, message: impl Into<String>) {
        self.errors.push(ObjectError {
            id: Some(object_id.to_string()),
            code,
            message: message.into(),
        });
    }

    pub fn ok_count(&self) -> usize {
        self.results.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn build(self) -> SignResponse {
        let status = if self.errors.is_empty() && !self.results.is_empty() {
            ResponseStatus::Ok
        } else if self.results.is_empty() {
            ResponseStatus::Error
        } else {
            ResponseStatus::Partial
        };

        let total_ms = self.started.elapsed().as_millis() as u64;
        log::info!(
            "response built: status={status:?}, results={}, errors={}, elapsed={total_ms}ms",
            self.results.len(),
            self.errors.len()
        );

        SignResponse {
            protocol_version: PROTOCOL_VERSION,
            request_id: self.request_id,
            status,
            results: self.results,
            errors: self.errors,
            metadata: self.metadata,
            metrics: Some(Metrics { total_ms }),
        }
    }
}

/// A request-level error response: the whole request was rejected
/// before (or instead of) per-object work. The single error entry
/// carries no object id, and no metrics are reported.
pub fn request_error_response(
    request_id: Option<&str>,
    code: ErrorCode,
    message: impl Into<String>,
    metadata: Option<&Value>,
) -> SignResponse {
    let message = message.into();
    log::warn!("request-level error: code={code}, message={message}");

    SignResponse {
        protocol_version: PROTOCOL_VERSION,
        request_id: request_id.unwrap_or("unknown").to_string(),
        status: ResponseStatus::Error,
        results: Vec::new(),
        errors: vec![ObjectError {
            id: None,
            code,
            message,
        }],
        metadata: metadata.cloned().unwrap_or(Value::Object(Default::default())),
        metrics: None,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::protocol::wire::{CallbackResult, UploadResult},
        serde_json::json,
    };

    fn ok_result(id: &str) -> ObjectResult {
        ObjectResult {
            id: id.to_string(),
            status: "ok",
            upload_result: UploadResult {
                status_code: 200,
                response_body: String::new(),
            },
            callback_result: CallbackResult {
                status: "sent",
                endpoint: "onSuccess",
                timestamp: "2025-01-01T00:00:00Z".to_string(),
            },
        }
    }

    #[test]
    fn all_ok_is_ok() {
        let mut builder = ResponseBuilder::new("r", json!({}));
        builder.add_result(ok_result("A"));

        let response = builder.build();
        assert_eq!(response.status, ResponseStatus::Ok);
        assert!(response.metrics.is_some());
    }

    #[test]
    fn no_results_is_error() {
        let mut builder = ResponseBuilder::new("r", json!({}));
        builder.add_error("A", ErrorCode::DownloadFailed, "HTTP 500");

        assert_eq!(builder.build().status, ResponseStatus::Error);
    }

    #[test]
    fn mixed_outcome_is_partial() {
        let mut builder = ResponseBuilder::new("r", json!({}));
        builder.add_result(ok_result("A"));
        builder.add_error("B", ErrorCode::UploadFailed, "HTTP 502");

        assert_eq!(builder.build().status, ResponseStatus::Partial);
    }

    #[test]
    fn metadata_is_echoed() {
        let metadata = json!({"batch": "b-77", "nested": {"k": [1, 2]}});
        let builder = ResponseBuilder::new("r", metadata.clone());

        assert_eq!(builder.build().metadata, metadata);
    }

    #[test]
    fn request_error_has_no_object_id_and_no_metrics() {
        let response = request_error_response(
            Some("r"),
            ErrorCode::UnsupportedVersion,
            "Unsupported protocolVersion: 2.0",
            None,
        );

        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].id.is_none());
        assert!(response.metrics.is_none());

        let wire = serde_json::to_value(&response).unwrap();
        assert!(wire.get("metrics").is_none());
        assert!(wire["errors"][0].get("id").is_none());
    }
}
