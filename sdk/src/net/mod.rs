//! HTTP side of the pipeline: content download, signed-artifact
//! upload, and caller callbacks.
//!
//! Every operation is one-shot: no retries. Timeouts are fixed per
//! operation (download 60 s, upload 120 s, callback 30 s) and applied
//! per request on a shared [`reqwest::Client`].

pub mod callbacks;
pub mod download;
pub mod upload;

use crate::protocol::wire::Headers;

/// Build the shared HTTP client. Per-operation timeouts are applied
/// on each request, so the client itself carries none.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("SignBridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

pub(crate) fn parse_method(method: &str) -> Option<reqwest::Method> {
    reqwest::Method::from_bytes(method.to_uppercase().as_bytes()).ok()
}

pub(crate) fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &Headers,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
}

/// Truncate to at most `max` bytes without splitting a UTF-8 scalar.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_utf8_respects_char_boundaries() {
        assert_eq!(truncate_utf8("abcdef", 4), "abcd");
        assert_eq!(truncate_utf8("ab", 4), "ab");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_utf8("aéz", 2), "a");
    }
}
