//! HTTP upstream proxy semantics: rewriting a request into absolute form
//! and injecting `Proxy-Authorization` for origins the proxy must reach
//! through another HTTP(S) proxy, plus the `no_proxy` bypass check and
//! the CONNECT handshake used to establish a tunnel through it first
//! (spec §4.C).

use base64::Engine;
use futures_lite::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;

use crate::error::{ProxyError, Result};
use crate::flow::make_connect_request;
use crate::message::Request;
use crate::options::Options;
use crate::serverspec::ServerSpec;

/// Whether `host` should bypass the configured upstream proxy entirely,
/// per `Options::no_proxy` — a literal set of hosts (spec's "No-proxy
/// matching is a literal set of hosts (comma-separated in config)"), not
/// a domain-suffix match.
pub fn bypasses_upstream(host: &str, options: &Options) -> bool {
    options.no_proxy.iter().any(|pattern| host.eq_ignore_ascii_case(pattern))
}

/// `user:pass` split from `Options::upstream_auth` for the SOCKS5
/// username/password auth method. Spec has no SOCKS-specific credential
/// field, so this reuses the same source the HTTP upstream's
/// `Proxy-Authorization` is built from (§4.C "upstream proxy semantics...
/// with authentication").
pub fn socks_credentials(options: &Options) -> Option<(&str, &str)> {
    options.upstream_auth.as_deref()?.split_once(':')
}

/// Rewrites `req` in place into absolute form (`GET http://host/path
/// HTTP/1.1`) and injects `Proxy-Authorization`, as required when forwarding
/// a plain-HTTP request to an upstream proxy rather than dialing the
/// origin directly.
pub fn rewrite_for_upstream(req: &mut Request, options: &Options) {
    if req.scheme.is_empty() {
        let scheme = if req.port == 443 { b"https".to_vec() } else { b"http".to_vec() };
        req.scheme = scheme;
        let authority = if (req.port == 80 && req.scheme == b"http") || (req.port == 443 && req.scheme == b"https") {
            req.host.clone()
        } else {
            format!("{}:{}", req.host, req.port)
        };
        req.authority = authority.into_bytes();
    }

    if let Some(custom) = &options.upstream_custom_auth {
        req.headers.set("Proxy-Authorization", custom.as_bytes().to_vec());
    } else if let Some(auth) = &options.upstream_auth {
        let encoded = base64::engine::general_purpose::STANDARD.encode(auth.as_bytes());
        req.headers.set("Proxy-Authorization", format!("Basic {encoded}").into_bytes());
    }
}

/// Dials the upstream HTTP proxy and, for a tunnel-needing target (TLS
/// interception or an opaque CONNECT), performs the `CONNECT` handshake
/// against it before handing the raw stream back to the caller.
pub async fn connect_tunnel(proxy: &ServerSpec, target_host: &str, target_port: u16, auth_header: Option<&[u8]>) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(ProxyError::Tcp)?;

    let authority = format!("{target_host}:{target_port}");
    let mut request = make_connect_request(&authority);
    if let Some(auth) = auth_header {
        // Splice the Proxy-Authorization header in just before the terminating blank line.
        let tail = request.split_off(request.len() - 2);
        request.extend_from_slice(b"Proxy-Authorization: ");
        request.extend_from_slice(auth);
        request.extend_from_slice(b"\r\n");
        request.extend_from_slice(&tail);
    }

    stream.write_all(&request).await.map_err(ProxyError::Tcp)?;

    let mut buf = Vec::new();
    let mut tmp = [0u8; 512];
    loop {
        let n = stream.read(&mut tmp).await.map_err(ProxyError::Tcp)?;
        if n == 0 {
            return Err(ProxyError::HttpReadDisconnect("upstream proxy closed before completing CONNECT".into()));
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 16 * 1024 {
            return Err(ProxyError::HttpSyntax("upstream proxy CONNECT response too large".into()));
        }
    }

    let status_line = buf.split(|&b| b == b'\n').next().unwrap_or(&[]);
    let status_text = String::from_utf8_lossy(status_line);
    let status_code: u16 = status_text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProxyError::HttpSyntax(format!("malformed upstream CONNECT response: {status_text:?}")))?;

    if status_code != 200 {
        return Err(ProxyError::Server(format!("upstream proxy refused CONNECT: {status_code}")));
    }

    Ok(stream)
}

/// Basic auth header value for `upstream_auth`, so other call sites
/// (the HTTP-forward layer rewriting an already-absolute-form request)
/// can reuse the same encoding.
pub fn basic_auth_header(options: &Options) -> Option<Vec<u8>> {
    if let Some(custom) = &options.upstream_custom_auth {
        return Some(custom.as_bytes().to_vec());
    }
    let auth = options.upstream_auth.as_ref()?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(auth.as_bytes());
    Some(format!("Basic {encoded}").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;

    fn origin_form_request() -> Request {
        Request {
            host: "example.com".into(),
            port: 80,
            method: b"GET".to_vec(),
            scheme: Vec::new(),
            authority: Vec::new(),
            path: b"/widgets".to_vec(),
            http_version: b"HTTP/1.1".to_vec(),
            headers: Headers::new(),
            content: None,
            trailers: None,
            timestamp_start: 0.0,
            timestamp_end: None,
        }
    }

    /// Scenario 5: a request bound for an upstream HTTP proxy is rewritten
    /// into absolute form and gets `Proxy-Authorization: Basic ...` injected
    /// from `Options::upstream_auth`.
    #[test]
    fn rewrite_for_upstream_injects_basic_auth_and_absolute_form() {
        let mut req = origin_form_request();
        let mut options = Options::default();
        options.upstream_auth = Some("alice:hunter2".to_string());

        rewrite_for_upstream(&mut req, &options);

        assert_eq!(req.scheme, b"http");
        assert_eq!(req.authority, b"example.com");
        let auth = req.headers.get("proxy-authorization").expect("Proxy-Authorization set");
        assert_eq!(auth, b"Basic YWxpY2U6aHVudGVyMg==");
    }

    #[test]
    fn rewrite_for_upstream_prefers_custom_auth_header_over_basic() {
        let mut req = origin_form_request();
        let mut options = Options::default();
        options.upstream_auth = Some("alice:hunter2".to_string());
        options.upstream_custom_auth = Some("Bearer abc123".to_string());

        rewrite_for_upstream(&mut req, &options);

        let auth = req.headers.get("proxy-authorization").expect("Proxy-Authorization set");
        assert_eq!(auth, b"Bearer abc123");
    }

    #[test]
    fn rewrite_for_upstream_leaves_headers_untouched_without_configured_auth() {
        let mut req = origin_form_request();
        let options = Options::default();

        rewrite_for_upstream(&mut req, &options);

        assert!(!req.headers.contains("proxy-authorization"));
    }

    #[test]
    fn bypasses_upstream_matches_only_the_literal_configured_host() {
        let mut options = Options::default();
        options.no_proxy = ["internal.example".to_string(), "corp.local".to_string()].into_iter().collect();

        assert!(bypasses_upstream("internal.example", &options));
        assert!(bypasses_upstream("Corp.Local", &options));
        assert!(!bypasses_upstream("api.corp.local", &options));
        assert!(!bypasses_upstream("example.com", &options));
    }

    #[test]
    fn socks_credentials_splits_user_and_pass() {
        let mut options = Options::default();
        options.upstream_auth = Some("alice:hunter2".to_string());
        assert_eq!(socks_credentials(&options), Some(("alice", "hunter2")));
    }

    #[test]
    fn socks_credentials_absent_without_configured_auth() {
        let options = Options::default();
        assert_eq!(socks_credentials(&options), None);
    }
}
