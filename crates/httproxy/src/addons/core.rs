//! The `core` addon: applies the proxy's own default response shaping
//! and is the one place a `Kill` request cooperatively short-circuits a
//! flow (spec §4.I, §7 "Kill"). An original decision function grouped
//! here the way `addons/__init__.py`'s `default_addons()` groups a
//! default installation's always-on behaviors, minus anything that would
//! need a UI or persistent storage (out of scope, §1).

use crate::error::ProxyError;
use crate::headers::Headers;
use crate::message::Response;

/// Version string stamped into synthesized responses' `Server` header,
/// matching the `Server: mitmproxy/<version>` convention the spec's error
/// template calls for (§6 "Error response").
pub const SERVER_HEADER: &str = concat!("httproxy/", env!("CARGO_PKG_VERSION"));

/// Ensures every response forwarded to the client carries a `Server`
/// header (mitmproxy's core addon adds its own banner if the origin's
/// response doesn't already identify a server), without clobbering
/// whatever the origin sent.
pub fn apply_default_headers(resp: &mut Response) {
    if !resp.headers.contains("server") {
        resp.headers.push(b"Server".to_vec(), SERVER_HEADER.as_bytes().to_vec());
    }
}

/// Builds the exact `Connection: close` + `Content-Length` + `Content-Type`
/// headers the spec requires on a synthesized error response (§6 "Error
/// response"), given an already-built HTML body.
pub fn error_response_headers(body_len: usize) -> Headers {
    let mut headers = Headers::new();
    headers.push(b"Server".to_vec(), SERVER_HEADER.as_bytes().to_vec());
    headers.push(b"Connection".to_vec(), b"close".to_vec());
    headers.push(b"Content-Length".to_vec(), body_len.to_string().into_bytes());
    headers.push(b"Content-Type".to_vec(), b"text/html".to_vec());
    headers
}

/// Whether an error reaching the connection handler is a cooperative
/// `Kill` request, which terminates the flow quietly rather than being
/// logged as a warning and turned into a 502 (spec §7).
pub fn is_kill(err: &ProxyError) -> bool {
    matches!(err, ProxyError::Kill)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_headers_skip_existing_server_header() {
        let mut resp = Response {
            http_version: b"HTTP/1.1".to_vec(),
            status_code: 200,
            reason: b"OK".to_vec(),
            headers: Headers::from([("Server", "origin/1.0")]),
            content: None,
            trailers: None,
            timestamp_start: 0.0,
            timestamp_end: None,
        };
        apply_default_headers(&mut resp);
        assert_eq!(resp.headers.get_all("server").len(), 1);
        assert_eq!(resp.headers.get("server"), Some(b"origin/1.0".as_slice()));
    }

    #[test]
    fn default_headers_add_banner_when_absent() {
        let mut resp = Response {
            http_version: b"HTTP/1.1".to_vec(),
            status_code: 200,
            reason: b"OK".to_vec(),
            headers: Headers::new(),
            content: None,
            trailers: None,
            timestamp_start: 0.0,
            timestamp_end: None,
        };
        apply_default_headers(&mut resp);
        assert!(resp.headers.get("server").is_some());
    }

    #[test]
    fn kill_is_recognized() {
        assert!(is_kill(&ProxyError::Kill));
        assert!(!is_kill(&ProxyError::Server("x".into())));
    }
}
