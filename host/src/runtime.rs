//! The host runtime.
//!
//! A reader task turns stdin into a stream of frames; the foreground
//! loop processes one request at a time. A frame arriving while a
//! request is in flight is answered immediately with `BAD_REQUEST`;
//! the reader keeps running so that rejection never waits on the
//! pipeline. Token re-enumeration ticks in the background, single
//! flight, and skips any tick while the pipeline holds the token.
//!
//! The PKCS#11 session is opened only after the operator authorizes
//! the request and lives inside the request scope: every exit path
//! (success, per-object failure, request-level failure, cancellation)
//! releases it by dropping the signer.

use {
    crate::operator::{AuthOutcome, Authorization, ConsoleOperator, Operator},
    anyhow::Result,
    signbridge_sdk::{
        conf,
        engine::{fan_out_request_error, response::request_error_response, CancelFlag, Pipeline,
                 ProgressObserver},
        framing::{read_frame, write_frame},
        net,
        protocol::{
            error::ErrorCode,
            resolve::{resolve, ResolvedObject},
            validate::validate_request,
            wire::{SignRequest, SignResponse},
        },
        sign::{P11TokenKey, TokenObjectSigner},
        token::manager::{SlotRef, TokenManager},
    },
    serde_json::Value,
    std::{path::PathBuf, sync::Arc, time::Duration},
    tokio::{
        io::Stdout,
        sync::{mpsc, Mutex},
        time::MissedTickBehavior,
    },
};

type SharedWriter = Arc<Mutex<Stdout>>;

#[derive(Clone)]
struct HostContext {
    manager: Arc<TokenManager>,
    client: reqwest::Client,
    writer: SharedWriter,
    /// Serializes pipeline token use against background enumeration.
    token_lock: Arc<Mutex<()>>,
    operator: Arc<dyn Operator>,
    /// Cancel flag of the in-flight request, if any; Ctrl-C sets it.
    cancel_slot: Arc<std::sync::Mutex<Option<CancelFlag>>>,
}

pub async fn run(extra_libs: Vec<PathBuf>) -> Result<()> {
    let mut lib_paths = conf::pkcs11_library_candidates();
    lib_paths.extend(extra_libs);
    let manager = Arc::new(TokenManager::load(&lib_paths));
    if manager.loaded_count() == 0 {
        log::warn!("no PKCS#11 library loaded - HSM middleware may not be installed");
    }

    let ctx = HostContext {
        manager: manager.clone(),
        client: net::build_client(),
        writer: Arc::new(Mutex::new(tokio::io::stdout())),
        token_lock: Arc::new(Mutex::new(())),
        operator: Arc::new(ConsoleOperator),
        cancel_slot: Arc::new(std::sync::Mutex::new(None)),
    };

    spawn_cancel_listener(ctx.cancel_slot.clone());
    spawn_token_refresh(manager, ctx.token_lock.clone());

    let (frames_tx, mut frames_rx) = mpsc::channel::<Value>(4);
    let reader = tokio::spawn(async move {
        let mut input = tokio::io::stdin();
        loop {
            match read_frame(&mut input).await {
                Ok(Some(frame)) => {
                    if frames_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    log::info!("extension disconnected (stdin closed)");
                    break;
                }
                Err(e) => {
                    log::error!("framing error, ending session: {e}");
                    break;
                }
            }
        }
    });

    // One request in flight at a time; frames arriving meanwhile are
    // rejected without waiting on the pipeline.
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;
    'main: loop {
        match in_flight.take() {
            None => {
                let Some(frame) = frames_rx.recv().await else {
                    break 'main;
                };
                in_flight = Some(tokio::spawn(handle_request(ctx.clone(), frame)));
            }
            Some(mut handle) => {
                tokio::select! {
                    _ = &mut handle => {}
                    maybe_frame = frames_rx.recv() => {
                        match maybe_frame {
                            None => {
                                let _ = handle.await;
                                break 'main;
                            }
                            Some(frame) => {
                                log::warn!("rejecting request received while one is in flight");
                                let response = request_error_response(
                                    frame.get("requestId").and_then(Value::as_str),
                                    ErrorCode::BadRequest,
                                    "a request is already in flight",
                                    frame.get("metadata"),
                                );
                                write_response(&ctx.writer, &response).await;
                                in_flight = Some(handle);
                            }
                        }
                    }
                }
            }
        }
    }

    if let Some(handle) = in_flight {
        let _ = handle.await;
    }
    reader.abort();
    log::info!("host shutting down");
    Ok(())
}

fn spawn_cancel_listener(cancel_slot: Arc<std::sync::Mutex<Option<CancelFlag>>>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            log::info!("cancellation requested by operator");
            if let Ok(slot) = cancel_slot.lock() {
                if let Some(flag) = slot.as_ref() {
                    flag.cancel();
                }
            }
        }
    });
}

/// Periodic slot re-enumeration. Single flight by construction (ticks
/// are skipped while one runs), and a tick is dropped entirely when
/// the pipeline holds the token lock.
fn spawn_token_refresh(manager: Arc<TokenManager>, token_lock: Arc<Mutex<()>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;

            let Ok(_guard) = token_lock.try_lock() else {
                continue;
            };
            let manager = manager.clone();
            match tokio::task::spawn_blocking(move || manager.enumerate_slots()).await {
                Ok(slots) => log::debug!("token refresh: {} slot(s)", slots.len()),
                Err(e) => log::warn!("token refresh task failed: {e}"),
            }
        }
    });
}

async fn handle_request(ctx: HostContext, frame: Value) {
    let request_id = frame
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_string);
    log::info!(
        "request received: requestId={}",
        request_id.as_deref().unwrap_or("?")
    );

    let request = match validate_request(&frame) {
        Ok(request) => request,
        Err(e) => {
            log::error!("validation failed: {e}");
            let response = request_error_response(
                request_id.as_deref(),
                e.code,
                e.message,
                frame.get("metadata"),
            );
            write_response(&ctx.writer, &response).await;
            return;
        }
    };
    let objects = resolve(&request);

    let cancel = CancelFlag::new();
    if let Ok(mut slot) = ctx.cancel_slot.lock() {
        *slot = Some(cancel.clone());
    }

    let response = process_authorized(&ctx, &request, &objects, cancel).await;

    if let Ok(mut slot) = ctx.cancel_slot.lock() {
        *slot = None;
    }
    write_response(&ctx.writer, &response).await;
}

async fn process_authorized(
    ctx: &HostContext,
    request: &SignRequest,
    objects: &[ResolvedObject],
    cancel: CancelFlag,
) -> SignResponse {
    // Enumerate under the token lock so we do not race a refresh tick.
    let slots = {
        let _guard = ctx.token_lock.lock().await;
        ctx.manager.enumerate_slots()
    };

    // Operator interaction blocks on the TTY.
    let outcome = {
        let operator = ctx.operator.clone();
        let request = request.clone();
        let object_count = objects.len();
        tokio::task::spawn_blocking(move || operator.authorize(&request, object_count, &slots))
            .await
    };
    let authorization = match outcome {
        Ok(Ok(AuthOutcome::Approved(auth))) => auth,
        Ok(Ok(AuthOutcome::NoToken)) => {
            return request_failure(
                ctx,
                request,
                objects,
                ErrorCode::CertNotFound,
                "No signing-capable token available",
            )
            .await;
        }
        Ok(Ok(AuthOutcome::Declined)) => {
            return request_failure(
                ctx,
                request,
                objects,
                ErrorCode::CancelledByUser,
                "User declined the signing request",
            )
            .await;
        }
        Ok(Err(e)) => {
            return request_failure(
                ctx,
                request,
                objects,
                ErrorCode::InternalError,
                &format!("operator interaction failed: {e}"),
            )
            .await;
        }
        Err(e) => {
            return request_failure(
                ctx,
                request,
                objects,
                ErrorCode::InternalError,
                &format!("operator task failed: {e}"),
            )
            .await;
        }
    };

    // The pipeline owns the token for the whole request.
    let _token_guard = ctx.token_lock.lock().await;

    let signer = {
        let manager = ctx.manager.clone();
        let cert_id = request.cert.cert_id.clone();
        let Authorization { slot, pin } = authorization;
        tokio::task::spawn_blocking(move || open_signer(&manager, &slot, &pin, &cert_id)).await
    };
    let signer = match signer {
        Ok(Ok(signer)) => signer,
        Ok(Err((code, message))) => {
            return request_failure(ctx, request, objects, code, &message).await;
        }
        Err(e) => {
            return request_failure(
                ctx,
                request,
                objects,
                ErrorCode::InternalError,
                &format!("token task failed: {e}"),
            )
            .await;
        }
    };

    let observer = ObserverAdapter(ctx.operator.as_ref());
    let pipeline = Pipeline {
        http: &ctx.client,
        signer: &signer,
        cancel,
        observer: Some(&observer),
    };
    let response = pipeline.run(request, objects).await;

    // Signer (and with it the authenticated session) drops here, on
    // every path out of this function.
    response
}

/// Open the authenticated session and select certificate + key.
/// Runs on the blocking pool; all failures map to request-level codes.
fn open_signer(
    manager: &TokenManager,
    slot: &SlotRef,
    pin: &str,
    cert_id: &str,
) -> Result<TokenObjectSigner<P11TokenKey>, (ErrorCode, String)> {
    use signbridge_sdk::token::certificate;

    let session = manager
        .open_session(slot, pin)
        .map_err(|e| (e.code(), e.to_string()))?;

    let certs = certificate::find_certificates(&session, false)
        .map_err(|e| (e.code(), e.to_string()))?;
    let Some(record) = certificate::match_certificate(&certs, cert_id) else {
        return Err((
            ErrorCode::CertNotFound,
            format!("Certificate not found on token: {cert_id}"),
        ));
    };
    let record = record.clone();
    log::info!("certificate found: {}", record.subject_cn);

    let key = certificate::find_private_key(&session, &record)
        .map_err(|e| (e.code(), e.to_string()))?;
    let Some(key) = key else {
        return Err((
            ErrorCode::CertNotFound,
            "No private key found for the selected certificate".to_string(),
        ));
    };

    Ok(TokenObjectSigner::new(P11TokenKey::new(session, key), record))
}

/// Request-level failure: error callbacks fan out to every resolved
/// object (the callers' sole failure channel), then the envelope.
async fn request_failure(
    ctx: &HostContext,
    request: &SignRequest,
    objects: &[ResolvedObject],
    code: ErrorCode,
    message: &str,
) -> SignResponse {
    fan_out_request_error(&ctx.client, request, objects, code, message).await;
    request_error_response(
        Some(&request.request_id),
        code,
        message,
        Some(&request.metadata),
    )
}

struct ObserverAdapter<'a>(&'a dyn Operator);

impl ProgressObserver for ObserverAdapter<'_> {
    fn object_progress(&self, object_id: &str, percent: u8, message: &str) {
        self.0.object_progress(object_id, percent, message);
    }
}

async fn write_response(writer: &SharedWriter, response: &SignResponse) {
    let value = match serde_json::to_value(response) {
        Ok(value) => value,
        Err(e) => {
            log::error!("failed to serialize response: {e}");
            return;
        }
    };
    let mut writer = writer.lock().await;
    if let Err(e) = write_frame(&mut *writer, &value).await {
        log::error!("failed to write response frame: {e}");
    }
}
