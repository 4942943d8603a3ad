//! Flow objects: the record of one logical exchange through the proxy,
//! handed to addons via the ask/tell channel (spec §3, §4.E).
//!
//! An `HTTPFlow` covers one request/response pair (or a request plus an
//! error, if the exchange never got a response). A `TCPFlow` covers an
//! opaque tunnel as an append-only sequence of `TCPMessage`s, used once a
//! CONNECT tunnel is not MITM'd (no TLS interception, or ALPN negotiated
//! something other than `http/1.1`).

use crate::headers::Headers;
use crate::io::now;
use crate::message::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Regular,
    Transparent,
    Upstream,
    Socks5,
}

/// A human-readable description of why a flow ended in error, mirroring
/// `mitmproxy.flow.Error`: every `ProxyError` that reaches the top of a
/// connection handler is downgraded to one of these before being attached
/// to the flow and shown to addons.
#[derive(Debug, Clone)]
pub struct FlowError {
    pub message: String,
    pub timestamp: f64,
}

impl FlowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: now(),
        }
    }
}

pub struct HTTPFlow {
    pub id: u64,
    pub mode: FlowMode,
    pub request: Request,
    pub response: Option<Response>,
    pub error: Option<FlowError>,
    pub client_sni: Option<String>,
    pub server_address: Option<(String, u16)>,
    /// Set by an addon that wants this flow's response synthesized rather
    /// than fetched from the origin (spec's `intercept` hook).
    pub intercepted: bool,
}

impl HTTPFlow {
    pub fn new(id: u64, mode: FlowMode, request: Request) -> Self {
        Self {
            id,
            mode,
            request,
            response: None,
            error: None,
            client_sni: None,
            server_address: None,
            intercepted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TCPMessageFrom {
    Client,
    Server,
}

#[derive(Debug, Clone)]
pub struct TCPMessage {
    pub from: TCPMessageFrom,
    pub content: Vec<u8>,
    pub timestamp: f64,
}

pub struct TCPFlow {
    pub id: u64,
    pub mode: FlowMode,
    pub client_sni: Option<String>,
    pub server_address: (String, u16),
    pub messages: Vec<TCPMessage>,
    pub error: Option<FlowError>,
}

impl TCPFlow {
    pub fn new(id: u64, mode: FlowMode, server_address: (String, u16)) -> Self {
        Self {
            id,
            mode,
            client_sni: None,
            server_address,
            messages: Vec::new(),
            error: None,
        }
    }

    pub fn push(&mut self, from: TCPMessageFrom, content: Vec<u8>) {
        self.messages.push(TCPMessage { from, content, timestamp: now() });
    }
}

/// Builds a synthesized error response (e.g. a 502 for a protocol
/// exception that reached the HTTP layer) as a `Response` ready for
/// `http1::assemble_response_head`, using the exact HTML template and
/// default headers the spec requires (§6 "Error response").
pub fn make_error_response(status_code: u16, message: &str) -> Response {
    make_error_response_with_detail(status_code, reason_for(status_code), message)
}

/// As [`make_error_response`], but with an explicit reason phrase rather
/// than the built-in table — used when relaying an upstream's own status
/// line verbatim into the error body.
pub fn make_error_response_with_detail(status_code: u16, reason: &str, message: &str) -> Response {
    let body = format!(
        "<html><head><title>{status_code} {reason}</title></head><body><h1>{status_code} {reason}</h1><p>{}</p></body></html>",
        html_escape(message),
    )
    .into_bytes();
    let headers = crate::addons::core::error_response_headers(body.len());
    Response {
        http_version: b"HTTP/1.1".to_vec(),
        status_code,
        reason: reason.as_bytes().to_vec(),
        headers,
        content: Some(body),
        trailers: None,
        timestamp_start: now(),
        timestamp_end: Some(now()),
    }
}

/// UTF-8-safe, replacement-on-error HTML escaping for the error body's
/// `<p>` text (spec §6: "encoded as UTF-8 (replacement on errors)").
fn html_escape(message: &str) -> String {
    message
        .chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

fn reason_for(status_code: u16) -> &'static str {
    match status_code {
        400 => "Bad Request",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// The `HTTP/1.1 200 Connection established` response sent to a client
/// after a successful CONNECT, with no headers — deliberately terse,
/// matching the original's workaround for Android emulator HTTP clients
/// that mis-handle a CONNECT response carrying any headers at all.
pub fn make_connect_response(http_version: &[u8]) -> Vec<u8> {
    let mut out = http_version.to_vec();
    out.extend_from_slice(b" 200 Connection established\r\n\r\n");
    out
}

/// Builds the `CONNECT host:port HTTP/1.1` request sent to an upstream
/// HTTP proxy when establishing a tunnel through it.
pub fn make_connect_request(authority: &str) -> Vec<u8> {
    format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n").into_bytes()
}
