//! The per-object pipeline.
//!
//! Drives one request to completion, strictly sequentially: for each
//! resolved object, progress -> acquire content -> sign -> upload ->
//! success callback, accumulating one result or error per object.
//! A step failure stops that object and fires its error callback;
//! siblings continue. Cancellation is cooperative: the flag is
//! checked before each object and before each blocking step, and once
//! set, the current and all remaining objects are marked
//! `CANCELLED_BY_USER` with their error callbacks fired best-effort.
//!
//! Callback ordering is a protocol guarantee: every callback for
//! object *i* completes before any callback for object *i+1* starts,
//! and the response envelope is composed only after the last callback
//! attempt.

pub mod response;

#[cfg(test)]
mod tests;

use {
    crate::{
        net::{callbacks, download::download_content, upload::upload_signed_content},
        protocol::{
            error::ErrorCode,
            resolve::ResolvedObject,
            wire::{CallbackResult, ObjectResult, SignRequest, SignResponse},
        },
        sign::ObjectSigner,
    },
    self::response::ResponseBuilder,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Cooperative cancellation flag, shared with the operator surface.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Operator-facing progress sink (the host renders it; tests record
/// it). Distinct from the caller's HTTP progress callback.
pub trait ProgressObserver: Send + Sync {
    fn object_progress(&self, object_id: &str, percent: u8, message: &str);
}

struct Failure {
    code: ErrorCode,
    message: String,
}

pub struct Pipeline<'a> {
    pub http: &'a reqwest::Client,
    pub signer: &'a dyn ObjectSigner,
    pub cancel: CancelFlag,
    pub observer: Option<&'a dyn ProgressObserver>,
}

impl Pipeline<'_> {
    /// Process every resolved object and compose the response.
    pub async fn run(&self, request: &SignRequest, objects: &[ResolvedObject]) -> SignResponse {
        let mut builder =
            ResponseBuilder::new(request.request_id.clone(), request.metadata.clone());
        let total = objects.len();
        log::info!(
            "processing {total} object(s) for request {}",
            request.request_id
        );

        let mut cancelled = false;
        for (index, object) in objects.iter().enumerate() {
            if cancelled || self.cancel.is_cancelled() {
                if !cancelled {
                    log::info!("user cancelled at object {}/{total}", index + 1);
                }
                cancelled = true;
                self.fail_object(
                    &mut builder,
                    request,
                    object,
                    ErrorCode::CancelledByUser,
                    "User cancelled the operation",
                )
                .await;
                continue;
            }

            match self.process_object(request, object, index, total, &mut builder).await {
                Ok(()) => {}
                Err(failure) => {
                    if failure.code == ErrorCode::CancelledByUser {
                        cancelled = true;
                    }
                    self.fail_object(&mut builder, request, object, failure.code, &failure.message)
                        .await;
                }
            }
        }

        if let Some(observer) = self.observer {
            observer.object_progress(
                "",
                100,
                &format!(
                    "Complete: {} ok, {} errors",
                    builder.ok_count(),
                    builder.error_count()
                ),
            );
        }

        builder.build()
    }

    async fn process_object(
        &self,
        request: &SignRequest,
        object: &ResolvedObject,
        index: usize,
        total: usize,
        builder: &mut ResponseBuilder,
    ) -> Result<(), Failure> {
        let label = format!("[{}/{total}] {}", index + 1, object.id);

        self.notify(object, index, total, 0, &format!("Processing {}...", object.id));
        self.progress_callback(request, object, "signing", 0, &format!("Starting {}", object.id))
            .await?;
        self.check_cancelled()?;

        // Acquire content.
        log::info!("{label}: acquiring content");
        let content = if let Some(inline) = &object.inline_content {
            inline.as_bytes().to_vec()
        } else if let Some(url) = &object.download_url {
            download_content(self.http, url, &object.download_method, &object.download_headers)
                .await
                .map_err(|e| Failure {
                    code: e.code,
                    message: e.message,
                })?
        } else {
            return Err(Failure {
                code: ErrorCode::InternalError,
                message: "object has neither inline content nor download URL".to_string(),
            });
        };
        self.check_cancelled()?;

        // Sign.
        log::info!("{label}: signing ({})", object.data_type);
        self.notify(object, index, total, 50, &format!("Signing {}...", object.id));
        self.progress_callback(request, object, "signing", 50, &format!("Signing {}...", object.id))
            .await?;

        let signed = self
            .signer
            .sign_object(object, &content)
            .map_err(|e| Failure {
                code: e.code,
                message: e.message,
            })?;
        self.check_cancelled()?;

        // Upload.
        log::info!("{label}: uploading signed content ({} bytes)", signed.len());
        self.progress_callback(
            request,
            object,
            "uploading",
            75,
            &format!("Uploading {}...", object.id),
        )
        .await?;

        let upload_result = upload_signed_content(
            self.http,
            &object.upload_url,
            signed,
            object.signed_content_type,
            &object.upload_method,
            &object.upload_headers,
        )
        .await
        .map_err(|e| Failure {
            code: e.code,
            message: e.message,
        })?;

        // Success callback, then record.
        log::info!("{label}: calling success callback");
        let timestamp = callbacks::send_success(
            self.http,
            &object.on_success,
            &object.callback_headers,
            &object.id,
            &request.request_id,
            &upload_result,
            &request.metadata,
        )
        .await;

        builder.add_result(ObjectResult {
            id: object.id.clone(),
            status: "ok",
            upload_result,
            callback_result: CallbackResult {
                status: "sent",
                endpoint: "onSuccess",
                timestamp,
            },
        });

        log::info!("{label}: completed successfully");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure {
                code: ErrorCode::CancelledByUser,
                message: "User cancelled the operation".to_string(),
            });
        }
        Ok(())
    }

    fn notify(
        &self,
        object: &ResolvedObject,
        index: usize,
        total: usize,
        step_percent: u8,
        message: &str,
    ) {
        if let Some(observer) = self.observer {
            let overall = if total == 0 {
                0
            } else {
                ((index * 100 + step_percent as usize) / total).min(100) as u8
            };
            observer.object_progress(&object.id, overall, message);
        }
    }

    async fn progress_callback(
        &self,
        request: &SignRequest,
        object: &ResolvedObject,
        status: &'static str,
        percent: u8,
        message: &str,
    ) -> Result<(), Failure> {
        let Some(url) = &object.progress else {
            return Ok(());
        };
        callbacks::send_progress(
            self.http,
            url,
            &object.callback_headers,
            &object.id,
            &request.request_id,
            status,
            percent,
            message,
            &request.metadata,
        )
        .await
        .map_err(|e| {
            log::warn!("progress callback failed for {}: {}", object.id, e.message);
            Failure {
                code: e.code,
                message: e.message,
            }
        })
    }

    async fn fail_object(
        &self,
        builder: &mut ResponseBuilder,
        request: &SignRequest,
        object: &ResolvedObject,
        code: ErrorCode,
        message: &str,
    ) {
        log::error!("{}: {code} - {message}", object.id);
        builder.add_error(&object.id, code, message);
        callbacks::send_error(
            self.http,
            &object.on_error,
            &object.callback_headers,
            &object.id,
            &request.request_id,
            code,
            message,
            &request.metadata,
        )
        .await;
    }
}

/// Fire one error callback per resolved object for a request-level
/// failure (cert not found, PIN failures, cancellation before the
/// pipeline, ...). Best-effort: delivery failures are already
/// swallowed by the callback layer.
pub async fn fan_out_request_error(
    client: &reqwest::Client,
    request: &SignRequest,
    objects: &[ResolvedObject],
    code: ErrorCode,
    message: &str,
) {
    for object in objects {
        callbacks::send_error(
            client,
            &object.on_error,
            &object.callback_headers,
            &object.id,
            &request.request_id,
            code,
            message,
            &request.metadata,
        )
        .await;
    }
}
