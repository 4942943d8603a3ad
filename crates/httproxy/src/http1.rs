//! HTTP/1.x wire codec: request/response line and header parsing, body
//! framing (`Content-Length`, `Transfer-Encoding: chunked`, read-to-EOF),
//! and serialization back to bytes.
//!
//! Grounded in the original proxy's readline-based parser
//! (`original_source`'s `net/http/http1/read.py`): headers are read a line
//! at a time with a continuation-line joiner, and body framing is resolved
//! by the same precedence order mitmproxy uses (chunked wins over
//! content-length, a response with no framing at all reads to EOF, 1xx/204/
//! 304/HEAD/CONNECT-success always have no body).

use futures_lite::AsyncRead;

use crate::error::{ProxyError, Result};
use crate::headers::Headers;
use crate::io::BufferedReader;
use crate::message::{Request, Response};

const MAX_LINE_LENGTH: usize = 64 * 1024;
const MAX_HEADERS: usize = 256;

/// How the body of a message is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Known(usize),
    Chunked,
    ReadToEof,
}

/// Reads a `METHOD target HTTP/x.y` request line plus headers. Does not
/// read the body — callers call `read_body` separately once framing is
/// known from context (spec §4.A keeps head and body reading distinct so
/// layers can decide per-request whether to stream or buffer).
pub async fn read_request_head<S: AsyncRead + Unpin>(
    reader: &mut BufferedReader<S>,
) -> Result<Request> {
    let timestamp_start = crate::io::now();
    let line = read_nonempty_line(reader).await?;
    let text = std::str::from_utf8(&line)
        .map_err(|_| ProxyError::HttpSyntax("request line is not valid UTF-8".into()))?
        .trim_end();
    let mut parts = text.splitn(3, ' ');
    let method = parts.next().unwrap_or_default();
    let target = parts
        .next()
        .ok_or_else(|| ProxyError::HttpSyntax(format!("bad request line: {text:?}")))?;
    let http_version = parts
        .next()
        .ok_or_else(|| ProxyError::HttpSyntax(format!("bad request line: {text:?}")))?;
    validate_http_version(http_version)?;

    if method.is_empty() || target.is_empty() {
        return Err(ProxyError::HttpSyntax(format!("bad request line: {text:?}")));
    }

    let (scheme, authority, host, port, path) = parse_target(method, target)?;
    let headers = read_headers(reader).await?;

    Ok(Request {
        host,
        port,
        method: method.as_bytes().to_vec(),
        scheme: scheme.into_bytes(),
        authority: authority.into_bytes(),
        path: path.into_bytes(),
        http_version: http_version.as_bytes().to_vec(),
        headers,
        content: None,
        trailers: None,
        timestamp_start,
        timestamp_end: None,
    })
}

/// Reads an `HTTP/x.y status reason` response line plus headers.
pub async fn read_response_head<S: AsyncRead + Unpin>(
    reader: &mut BufferedReader<S>,
) -> Result<Response> {
    let timestamp_start = crate::io::now();
    let line = read_nonempty_line(reader).await?;
    let text = std::str::from_utf8(&line)
        .map_err(|_| ProxyError::HttpSyntax("status line is not valid UTF-8".into()))?
        .trim_end();
    let mut parts = text.splitn(3, ' ');
    let http_version = parts
        .next()
        .ok_or_else(|| ProxyError::HttpSyntax(format!("bad response line: {text:?}")))?;
    validate_http_version(http_version)?;
    let status_str = parts
        .next()
        .ok_or_else(|| ProxyError::HttpSyntax(format!("bad response line: {text:?}")))?;
    let status_code: u16 = status_str
        .parse()
        .map_err(|_| ProxyError::HttpSyntax(format!("bad status code: {status_str:?}")))?;
    let reason = parts.next().unwrap_or("").to_string();

    let headers = read_headers(reader).await?;

    Ok(Response {
        http_version: http_version.as_bytes().to_vec(),
        status_code,
        reason: reason.into_bytes(),
        headers,
        content: None,
        trailers: None,
        timestamp_start,
        timestamp_end: None,
    })
}

/// Skips a single leading blank line some clients send before the request
/// line (a quirk the original parser tolerates), then returns the first
/// genuinely non-empty line. An empty line at EOF means a clean
/// disconnect before any bytes of a new message arrived.
async fn read_nonempty_line<S: AsyncRead + Unpin>(reader: &mut BufferedReader<S>) -> Result<Vec<u8>> {
    let mut line = reader.readline(MAX_LINE_LENGTH).await?;
    if line == b"\r\n" || line == b"\n" {
        line = reader.readline(MAX_LINE_LENGTH).await?;
    }
    if line.is_empty() {
        return Err(ProxyError::HttpReadDisconnect("client closed before a complete message".into()));
    }
    Ok(line)
}

fn validate_http_version(v: &str) -> Result<()> {
    if v == "HTTP/1.0" || v == "HTTP/1.1" {
        Ok(())
    } else {
        Err(ProxyError::HttpSyntax(format!("unsupported HTTP version: {v:?}")))
    }
}

/// Splits a request target into `(scheme, authority, host, port, path)`.
/// `CONNECT host:port` and absolute-form `scheme://host[:port]/path` both
/// carry an authority; origin-form paths carry neither.
fn parse_target(method: &str, target: &str) -> Result<(String, String, String, u16, String)> {
    if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = split_host_port(target, None)
            .ok_or_else(|| ProxyError::HttpSyntax(format!("bad CONNECT authority: {target:?}")))?;
        return Ok((String::new(), target.to_string(), host, port, String::new()));
    }

    if let Some((scheme, rest)) = target.split_once("://") {
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let default_port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };
        let (host, port) = split_host_port(authority, Some(default_port))
            .ok_or_else(|| ProxyError::HttpSyntax(format!("bad absolute-form authority: {authority:?}")))?;
        return Ok((scheme.to_string(), authority.to_string(), host, port, path.to_string()));
    }

    Ok((String::new(), String::new(), String::new(), 0, target.to_string()))
}

fn split_host_port(authority: &str, default_port: Option<u16>) -> Option<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let port = match rest.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => default_port?,
        };
        return Some((host.to_string(), port));
    }
    match authority.rsplit_once(':') {
        Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
            Some((h.to_string(), p.parse().ok()?))
        }
        _ => Some((authority.to_string(), default_port?)),
    }
}

/// Reads header lines until the terminating blank line, joining
/// continuation lines (leading space/tab) onto the previous value with a
/// literal `\r\n ` separator — mirrors `Headers.append_continuation` and
/// the wire representation the original re-emits for proxied messages.
async fn read_headers<S: AsyncRead + Unpin>(reader: &mut BufferedReader<S>) -> Result<Headers> {
    let mut headers = Headers::new();
    loop {
        let line = reader.readline(MAX_LINE_LENGTH).await?;
        if line.is_empty() {
            return Err(ProxyError::HttpReadDisconnect("client closed before a complete message".into()));
        }
        if line == b"\r\n" || line == b"\n" {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ProxyError::HttpSyntax("too many headers".into()));
        }
        if matches!(line.first(), Some(b' ') | Some(b'\t')) {
            headers.append_continuation(trim_crlf(&line))?;
            continue;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| ProxyError::HttpSyntax(format!("invalid header line: {line:?}")))?;
        let name = line[..colon].to_vec();
        let value = trim_crlf(&line[colon + 1..]).to_vec();
        headers.push(name, value);
    }
    Ok(headers)
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    let mut start = 0;
    while start < end && (line[start] == b' ' || line[start] == b'\t') {
        start += 1;
    }
    &line[start..end]
}

/// Resolves how a request body is framed, per RFC 7230 §3.3.3 with the
/// duplicate/conflicting `Content-Length` check mitmproxy enforces
/// (two distinct values is a hard parse error, not "pick one"). A request
/// still waiting on a `100-continue` handshake has nothing to read yet —
/// this proxy never sends the interim `100 Continue` itself, so the body
/// reads as empty until the client decides to send it unprompted (spec
/// §4.B "pre-response only").
pub fn expected_request_body_size(req: &Request) -> Result<BodyFraming> {
    if req.is_connect() {
        return Ok(BodyFraming::None);
    }
    if req
        .headers
        .get_all_tokens("expect")
        .iter()
        .any(|t| t.eq_ignore_ascii_case("100-continue"))
    {
        return Ok(BodyFraming::None);
    }
    framing_from_headers(&req.headers, false)
}

/// Resolves response body framing. `no_body` covers 1xx/204/304 and
/// responses to HEAD or a successful CONNECT, all of which never carry a
/// body regardless of what headers claim.
pub fn expected_response_body_size(resp: &Response, no_body: bool) -> Result<BodyFraming> {
    if no_body || matches!(resp.status_code, 100..=199 | 204 | 304) {
        return Ok(BodyFraming::None);
    }
    let framing = framing_from_headers(&resp.headers, true)?;
    Ok(if framing == BodyFraming::None { BodyFraming::ReadToEof } else { framing })
}

fn framing_from_headers(headers: &Headers, eof_if_unframed: bool) -> Result<BodyFraming> {
    let transfer_encodings = headers.get_all_tokens("transfer-encoding");
    if transfer_encodings.iter().any(|t| t.eq_ignore_ascii_case("chunked")) {
        return Ok(BodyFraming::Chunked);
    }

    let lengths = headers.get_all("content-length");
    if !lengths.is_empty() {
        let mut distinct = std::collections::HashSet::new();
        for raw in &lengths {
            let s = std::str::from_utf8(raw)
                .map_err(|_| ProxyError::HttpSyntax("invalid Content-Length".into()))?;
            distinct.insert(s.trim().to_string());
        }
        if distinct.len() > 1 {
            return Err(ProxyError::HttpSyntax("conflicting Content-Length headers".into()));
        }
        let n: usize = distinct
            .into_iter()
            .next()
            .unwrap()
            .parse()
            .map_err(|_| ProxyError::HttpSyntax("invalid Content-Length".into()))?;
        return Ok(BodyFraming::Known(n));
    }

    if eof_if_unframed {
        Ok(BodyFraming::ReadToEof)
    } else {
        Ok(BodyFraming::None)
    }
}

/// Reads a body of the given framing, honoring `limit` (spec's
/// `body_size_limit`/`stream_large_bodies`) by raising a protocol error once
/// exceeded rather than silently truncating.
pub async fn read_body<S: AsyncRead + Unpin>(
    reader: &mut BufferedReader<S>,
    framing: BodyFraming,
    limit: Option<usize>,
) -> Result<Vec<u8>> {
    match framing {
        BodyFraming::None => Ok(Vec::new()),
        BodyFraming::Known(n) => {
            check_limit(n, limit)?;
            let data = reader.read(n).await?;
            if data.len() != n {
                return Err(ProxyError::HttpReadDisconnect("client closed before a complete message".into()));
            }
            Ok(data)
        }
        BodyFraming::ReadToEof => {
            let mut out = Vec::new();
            loop {
                let chunk = reader.read(8192).await?;
                if chunk.is_empty() {
                    break;
                }
                out.extend_from_slice(&chunk);
                check_limit(out.len(), limit)?;
            }
            Ok(out)
        }
        BodyFraming::Chunked => read_chunked(reader, limit).await,
    }
}

async fn read_chunked<S: AsyncRead + Unpin>(
    reader: &mut BufferedReader<S>,
    limit: Option<usize>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let size_line = reader.readline(128).await?;
        if size_line.is_empty() {
            return Err(ProxyError::HttpReadDisconnect("client closed before a complete message".into()));
        }
        let size_str = std::str::from_utf8(&size_line)
            .map_err(|_| ProxyError::HttpSyntax("invalid chunk size".into()))?
            .trim();
        let size_str = size_str.split(';').next().unwrap_or(size_str);
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ProxyError::HttpSyntax(format!("invalid chunk size: {size_str:?}")))?;
        if size == 0 {
            // Trailing headers, then the terminating blank line.
            loop {
                let trailer = reader.readline(MAX_LINE_LENGTH).await?;
                if trailer.is_empty() {
                    return Err(ProxyError::HttpReadDisconnect("client closed before a complete message".into()));
                }
                if trailer == b"\r\n" || trailer == b"\n" {
                    break;
                }
            }
            break;
        }
        check_limit(out.len() + size, limit)?;
        let data = reader.read(size).await?;
        if data.len() != size {
            return Err(ProxyError::HttpReadDisconnect("client closed before a complete message".into()));
        }
        out.extend_from_slice(&data);
        let crlf = reader.readline(5).await?;
        if crlf != b"\r\n" {
            return Err(ProxyError::HttpSyntax("malformed chunk terminator".into()));
        }
    }
    Ok(out)
}

/// Once a chunked body has been fully decoded into a buffer, its wire
/// representation is no longer chunked: re-serializing the original
/// `Transfer-Encoding: chunked` header alongside the raw decoded bytes
/// would send a body with no chunk framing under a header claiming there
/// is one. Strips `Transfer-Encoding` and replaces any `Content-Length`
/// with one matching the decoded length, so `assemble_request_head`/
/// `assemble_response_head` re-serialize a message the far end can parse.
pub fn rechunk_as_known_length(headers: &mut Headers, content_len: usize) {
    headers.remove("transfer-encoding");
    headers.set("Content-Length", content_len.to_string());
}

fn check_limit(size: usize, limit: Option<usize>) -> Result<()> {
    if let Some(max) = limit {
        if size > max {
            return Err(ProxyError::Http(format!(
                "body size {size} exceeds configured limit of {max} bytes"
            )));
        }
    }
    Ok(())
}

/// Whether the connection should be closed after this message, per
/// `Connection` header tokens and the HTTP/1.0-defaults-to-close rule.
pub fn connection_close(http_version: &[u8], headers: &Headers) -> bool {
    let tokens = headers.get_all_tokens("connection");
    if tokens.iter().any(|t| t.eq_ignore_ascii_case("close")) {
        return true;
    }
    if tokens.iter().any(|t| t.eq_ignore_ascii_case("keep-alive")) {
        return false;
    }
    http_version == b"HTTP/1.0"
}

/// Serializes a request head (first line + headers + terminating blank
/// line) back to wire bytes, e.g. to forward to the origin server with a
/// rewritten target.
pub fn assemble_request_head(req: &Request) -> Vec<u8> {
    let mut out = req.first_line_bytes();
    out.extend_from_slice(b"\r\n");
    assemble_headers(&req.headers, &mut out);
    out
}

pub fn assemble_response_head(resp: &Response) -> Vec<u8> {
    let mut out = resp.status_line_bytes();
    out.extend_from_slice(b"\r\n");
    assemble_headers(&resp.headers, &mut out);
    out
}

fn assemble_headers(headers: &Headers, out: &mut Vec<u8>) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::io::Cursor;

    fn reader(bytes: &'static [u8]) -> BufferedReader<Cursor<&'static [u8]>> {
        BufferedReader::new(Cursor::new(bytes))
    }

    #[test]
    fn parses_absolute_form_get() {
        smol::block_on(async {
            let mut r = reader(b"GET http://example.com/a HTTP/1.1\r\nHost: example.com\r\n\r\n");
            let req = read_request_head(&mut r).await.unwrap();
            assert_eq!(req.method, b"GET");
            assert_eq!(req.host, "example.com");
            assert_eq!(req.port, 80);
            assert!(req.is_absolute_form());
            assert_eq!(req.headers.get("host"), Some(b"example.com".as_slice()));
        });
    }

    #[test]
    fn parses_connect_authority() {
        smol::block_on(async {
            let mut r = reader(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n");
            let req = read_request_head(&mut r).await.unwrap();
            assert!(req.is_connect());
            assert_eq!(req.host, "example.com");
            assert_eq!(req.port, 443);
        });
    }

    #[test]
    fn duplicate_conflicting_content_length_is_rejected() {
        let mut headers = Headers::new();
        headers.push(b"Content-Length".to_vec(), b"5".to_vec());
        headers.push(b"Content-Length".to_vec(), b"6".to_vec());
        let req = Request {
            host: String::new(),
            port: 0,
            method: b"POST".to_vec(),
            scheme: Vec::new(),
            authority: Vec::new(),
            path: b"/".to_vec(),
            http_version: b"HTTP/1.1".to_vec(),
            headers,
            content: None,
            trailers: None,
            timestamp_start: 0.0,
            timestamp_end: None,
        };
        assert!(expected_request_body_size(&req).is_err());
    }

    #[test]
    fn chunked_body_reassembles_across_chunks() {
        smol::block_on(async {
            let mut r = reader(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
            let body = read_body(&mut r, BodyFraming::Chunked, None).await.unwrap();
            assert_eq!(body, b"Wikipedia");
        });
    }

    #[test]
    fn http_1_0_without_keepalive_closes() {
        let headers = Headers::new();
        assert!(connection_close(b"HTTP/1.0", &headers));
    }

    #[test]
    fn connection_keep_alive_token_overrides_1_0_default() {
        let mut headers = Headers::new();
        headers.push(b"Connection".to_vec(), b"keep-alive".to_vec());
        assert!(!connection_close(b"HTTP/1.0", &headers));
    }

    #[test]
    fn rechunk_replaces_transfer_encoding_with_content_length() {
        let mut headers = Headers::new();
        headers.push(b"Transfer-Encoding".to_vec(), b"chunked".to_vec());
        rechunk_as_known_length(&mut headers, 5);
        assert!(!headers.contains("transfer-encoding"));
        assert_eq!(headers.get("content-length"), Some(b"5".as_slice()));
    }
}
