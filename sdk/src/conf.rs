//! Application identity, protocol constants and platform paths.

use std::{path::PathBuf, time::Duration};

pub const APP_NAME: &str = "SignBridge";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Native messaging host name registered with the browser.
pub const HOST_NAME: &str = "io.signbridge.host";

/// Pinned wire protocol version. Requests declaring anything else are
/// rejected with `UNSUPPORTED_VERSION`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Browsers enforce a 1 MiB limit on native-messaging payloads.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Hard cap on each inline content payload.
pub const MAX_INLINE_BYTES: usize = 1024 * 1024;

/// Upload endpoint response bodies are captured verbatim up to this
/// many bytes for the success callback and the response envelope.
pub const UPLOAD_BODY_CAPTURE_BYTES: usize = 4096;

pub const HTTP_TIMEOUT_DOWNLOAD: Duration = Duration::from_secs(60);
pub const HTTP_TIMEOUT_UPLOAD: Duration = Duration::from_secs(120);
pub const HTTP_TIMEOUT_CALLBACK: Duration = Duration::from_secs(30);

// Rolling diagnostic log: multi-file, size-bounded, under the user's
// home directory. No request data is ever persisted.
pub const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const LOG_KEEP_FILES: usize = 3;

/// Directory holding the rolling diagnostic log.
pub fn log_dir() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".signbridge").join("logs"))
}

/// Candidate PKCS#11 vendor libraries for the current platform, in
/// search order. Every existing candidate is loaded; a library that
/// fails to load is skipped with a warning.
pub fn pkcs11_library_candidates() -> Vec<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Windows\System32\eTPKCS11.dll",
            r"C:\Program Files\SafeNet\Authentication\SAC\x64\eTPKCS11.dll",
            r"C:\Program Files (x86)\SafeNet\Authentication\SAC\x32\eTPKCS11.dll",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/usr/local/lib/libeToken.dylib",
            "/Library/Frameworks/eToken.framework/Versions/Current/libeToken.dylib",
            "/Library/OpenSC/lib/opensc-pkcs11.so",
        ]
    } else {
        &[
            "/usr/lib/libeTPkcs11.so",
            "/usr/local/lib/libeTPkcs11.so",
            "/usr/lib/x86_64-linux-gnu/libeTPkcs11.so",
            "/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so",
        ]
    };

    candidates.iter().map(PathBuf::from).collect()
}

/// Redact everything after `?` so query strings (signed URLs, access
/// tokens) never reach the log.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?..."),
        None => url.to_string(),
    }
}
