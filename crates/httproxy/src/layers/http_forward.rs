//! The regular (forward-proxy) HTTP/1 layer: reads one or more requests
//! off the client connection, dials the origin (directly, through an
//! HTTP upstream, or through a SOCKS upstream) and relays request/
//! response pairs, handling `CONNECT` by deciding whether to MITM with
//! TLS, relay opaquely, or tunnel through an upstream proxy first
//! (spec §4.B/§4.C).

use std::sync::Arc;

use smol::net::TcpStream;

use crate::ca::CertificateAuthority;
use crate::channel::{Channel, Event};
use crate::connection::Transport;
use crate::error::{ProxyError, Result};
use crate::flow::{FlowMode, HTTPFlow, make_connect_response, make_error_response};
use crate::headers::Headers;
use crate::http1;
use crate::io::{BufferedReader, now};
use crate::layers::{rawtcp, tls, upstream_http, upstream_socks};
use crate::message::{Request, Response};
use crate::options::{Mode, Options};

/// Headers meaningful only for the current connection, never forwarded
/// past this proxy (spec §6 "EXTERNAL INTERFACES"). `Proxy-Authorization`
/// is hop-by-hop too, but a fresh one is re-added afterward by
/// `upstream_http::rewrite_for_upstream`/`basic_auth_header` when the
/// request is actually headed through a configured HTTP upstream.
///
/// Grounded in the teacher's `is_hop_by_hop_header`/
/// `should_skip_request_header`/`should_skip_response_header`
/// (`start/mod.rs`), generalized to the exact header set spec's §6 names
/// rather than the teacher's narrower connection-reuse-driven list.
fn strip_hop_by_hop_headers(headers: &mut Headers) {
    const HOP_BY_HOP: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Drives one client connection end to end: reads requests, forwards
/// each to its destination, writes the response back, and repeats until
/// the connection closes or a `Connection: close` is seen.
pub async fn serve(
    client: TcpStream,
    options: &Options,
    ca: &Arc<dyn CertificateAuthority>,
    channel: &Channel,
    mut next_flow_id: impl FnMut() -> u64,
) -> Result<()> {
    let mode = options.mode.parse()?;
    let mut reader = BufferedReader::new(client);

    loop {
        if channel.should_exit().await {
            return Ok(());
        }

        let mut req = match http1::read_request_head(&mut reader).await {
            Ok(req) => req,
            Err(ProxyError::HttpReadDisconnect(_)) => return Ok(()),
            Err(e) => return respond_with_protocol_error(reader.get_mut(), channel, e).await,
        };

        let framing = match http1::expected_request_body_size(&req) {
            Ok(f) => f,
            Err(e) => return respond_with_protocol_error(reader.get_mut(), channel, e).await,
        };
        req.content = match http1::read_body(&mut reader, framing, options.body_size_limit).await {
            Ok(c) => Some(c),
            Err(e) => return respond_with_protocol_error(reader.get_mut(), channel, e).await,
        };
        if framing == http1::BodyFraming::Chunked {
            http1::rechunk_as_known_length(&mut req.headers, req.content.as_ref().unwrap().len());
        }

        if req.is_connect() {
            handle_connect(&mut reader, req, options, &mode, ca, channel, &mut next_flow_id).await?;
            return Ok(());
        }

        let flow_id = next_flow_id();
        let mut flow = HTTPFlow::new(flow_id, flow_mode(&mode), req);
        channel.tell(Event::HttpRequestHeaders(streamed_request_copy(&flow, options))).await;

        let close_after = http1::connection_close(&flow.request.http_version, &flow.request.headers);

        match forward_one(&flow.request, options, &mode).await {
            Ok(mut resp) => {
                crate::addons::core::apply_default_headers(&mut resp);
                flow.response = Some(resp);
            }
            Err(e) => {
                channel.log(crate::channel::LogLevel::Warn, format!("upstream error: {e}")).await;
                flow.error = Some(crate::flow::FlowError::new(e.to_string()));
                flow.response = Some(make_error_response(502, "Bad Gateway"));
            }
        }

        let response = flow.response.as_mut().unwrap();
        let response_requests_close = response
            .headers
            .get_all_tokens("connection")
            .iter()
            .any(|t| t.eq_ignore_ascii_case("close"));
        strip_hop_by_hop_headers(&mut response.headers);

        let response = flow.response.as_ref().unwrap();
        let mut out = http1::assemble_response_head(response);
        if let Some(body) = &response.content {
            out.extend_from_slice(body);
        }
        crate::io::write_all(reader.get_mut(), &out).await?;

        let mut addon_flow = flow;
        if let Some(resp) = addon_flow.response.as_mut() {
            resp.content = crate::addons::streambodies::addon_visible_content(
                resp.content.take().unwrap_or_default(),
                options.stream_large_bodies,
            );
        }
        channel.tell(Event::HttpResponse(addon_flow)).await;

        if close_after || response_requests_close {
            return Ok(());
        }
    }
}

/// `HTTPFlow` doesn't implement `Clone` (it owns a non-Clone `Request`),
/// so the `request` event's flow is a fresh copy rather than a move,
/// leaving `flow` available to carry the response once it arrives. The
/// copy's body is replaced with `None` once it exceeds
/// `stream_large_bodies`, per the `streambodies` addon (spec §4.I).
fn streamed_request_copy(flow: &HTTPFlow, options: &Options) -> HTTPFlow {
    HTTPFlow {
        id: flow.id,
        mode: flow.mode,
        request: Request {
            host: flow.request.host.clone(),
            port: flow.request.port,
            method: flow.request.method.clone(),
            scheme: flow.request.scheme.clone(),
            authority: flow.request.authority.clone(),
            path: flow.request.path.clone(),
            http_version: flow.request.http_version.clone(),
            headers: flow.request.headers.clone(),
            content: crate::addons::streambodies::addon_visible_content(
                flow.request.content.clone().unwrap_or_default(),
                options.stream_large_bodies,
            ),
            trailers: flow.request.trailers.clone(),
            timestamp_start: flow.request.timestamp_start,
            timestamp_end: flow.request.timestamp_end,
        },
        response: None,
        error: None,
        client_sni: flow.client_sni.clone(),
        server_address: flow.server_address,
        intercepted: flow.intercepted,
    }
}

fn flow_mode(mode: &Mode) -> FlowMode {
    match mode {
        Mode::Regular => FlowMode::Regular,
        Mode::Transparent => FlowMode::Transparent,
        Mode::Upstream(_) => FlowMode::Upstream,
        Mode::Socks5 => FlowMode::Socks5,
    }
}

/// Dials the origin (directly, or per `mode`) and performs one
/// request/response exchange. A fresh connection per request keeps the
/// forwarding path simple; nothing here prevents a future revision from
/// pooling connections per `(host, port)`.
async fn forward_one(req: &Request, options: &Options, mode: &Mode) -> Result<Response> {
    let mut out_req = Request {
        host: req.host.clone(),
        port: req.port,
        method: req.method.clone(),
        scheme: req.scheme.clone(),
        authority: req.authority.clone(),
        path: req.path.clone(),
        http_version: req.http_version.clone(),
        headers: req.headers.clone(),
        content: req.content.clone(),
        trailers: req.trailers.clone(),
        timestamp_start: req.timestamp_start,
        timestamp_end: req.timestamp_end,
    };
    strip_hop_by_hop_headers(&mut out_req.headers);
    // Always forward in origin form to the origin server; absolute-form
    // is only meaningful on the wire between client and this proxy.
    let origin_path = out_req.path.clone();

    let mut stream = match mode {
        Mode::Upstream(spec) if !upstream_http::bypasses_upstream(&req.host, options) => {
            if spec.scheme.is_socks() {
                upstream_socks::connect(spec, &req.host, req.port, upstream_http::socks_credentials(options)).await?
            } else {
                upstream_http::rewrite_for_upstream(&mut out_req, options);
                let auth = upstream_http::basic_auth_header(options);
                upstream_http::connect_tunnel(spec, &req.host, req.port, auth.as_deref()).await?
            }
        }
        Mode::Socks5 => {
            return Err(ProxyError::Server("socks5 inbound mode dials no upstream for plain HTTP requests".into()));
        }
        _ => TcpStream::connect((req.host.as_str(), req.port)).await.map_err(ProxyError::Tcp)?,
    };

    out_req.scheme = Vec::new();
    out_req.authority = Vec::new();
    out_req.path = origin_path;

    let head = http1::assemble_request_head(&out_req);
    crate::io::write_all(&mut stream, &head).await?;
    if let Some(body) = &out_req.content {
        crate::io::write_all(&mut stream, body).await?;
    }

    let mut reader = BufferedReader::new(stream);
    let mut resp = http1::read_response_head(&mut reader).await?;
    let no_body = out_req.method.eq_ignore_ascii_case("HEAD");
    let framing = http1::expected_response_body_size(&resp, no_body)?;
    resp.content = Some(http1::read_body(&mut reader, framing, options.body_size_limit).await?);
    if framing == http1::BodyFraming::Chunked {
        http1::rechunk_as_known_length(&mut resp.headers, resp.content.as_ref().unwrap().len());
    }
    resp.timestamp_end = Some(now());
    Ok(resp)
}

/// Handles a `CONNECT` request: decides MITM vs. opaque relay, then hands
/// off to whichever layer owns the rest of the connection's life.
async fn handle_connect(
    reader: &mut BufferedReader<TcpStream>,
    req: Request,
    options: &Options,
    mode: &Mode,
    ca: &Arc<dyn CertificateAuthority>,
    channel: &Channel,
    next_flow_id: &mut impl FnMut() -> u64,
) -> Result<()> {
    let host = req.host.clone();
    let port = req.port;

    let dial_result = match mode {
        Mode::Upstream(spec) if !upstream_http::bypasses_upstream(&host, options) => {
            if spec.scheme.is_socks() {
                upstream_socks::connect(spec, &host, port, upstream_http::socks_credentials(options)).await
            } else {
                let auth = upstream_http::basic_auth_header(options);
                upstream_http::connect_tunnel(spec, &host, port, auth.as_deref()).await
            }
        }
        _ => TcpStream::connect((host.as_str(), port)).await.map_err(ProxyError::Tcp),
    };
    // Unlike `forward_one`'s dial failure (turned into a 502 by `serve`'s
    // caller after the fact), a failed CONNECT dial has to be reported
    // before the CONNECT ack is ever written — once that ack goes out the
    // client believes the tunnel is live.
    let server_stream = match dial_result {
        Ok(stream) => stream,
        Err(e) => return respond_with_protocol_error(reader.get_mut(), channel, e).await,
    };

    let mut client_stream = reader.into_inner();
    crate::io::write_all(&mut client_stream, &make_connect_response(&req.http_version)).await?;
    channel.tell(Event::HttpConnect { host: host.clone(), port }).await;

    let flow_id = next_flow_id();
    let mitm = options.tls_ports.contains(&port);

    if !mitm {
        let mut tcp_flow = crate::flow::TCPFlow::new(flow_id, flow_mode(mode), (host, port));
        channel.tell(Event::TcpStart(crate::flow::TCPFlow {
            id: tcp_flow.id,
            mode: tcp_flow.mode,
            client_sni: None,
            server_address: tcp_flow.server_address.clone(),
            messages: Vec::new(),
            error: None,
        })).await;
        let result = rawtcp::relay(Transport::Plain(client_stream), Transport::Plain(server_stream), channel, flow_id).await;
        if let Err(e) = &result {
            tcp_flow.error = Some(crate::flow::FlowError::new(e.to_string()));
            channel.tell(Event::TcpError { flow_id, message: e.to_string() }).await;
        }
        channel.tell(Event::TcpEnd(tcp_flow)).await;
        return result;
    }

    let (client_tls, client_alpn) = tls::intercept(client_stream, &host, ca).await?;

    if client_alpn.as_deref() != Some(b"http/1.1") {
        let server_tls = dial_server_tls(server_stream, &host).await?;
        let mut tcp_flow = crate::flow::TCPFlow::new(flow_id, flow_mode(mode), (host, port));
        let result = rawtcp::relay(client_tls, server_tls, channel, flow_id).await;
        if let Err(e) = &result {
            tcp_flow.error = Some(crate::flow::FlowError::new(e.to_string()));
            channel.tell(Event::TcpError { flow_id, message: e.to_string() }).await;
        }
        channel.tell(Event::TcpEnd(tcp_flow)).await;
        return result;
    }

    let (server_transport, _) = dial_server_tls_with_alpn(server_stream, &host).await?;
    let mut inner_client = match client_tls {
        Transport::TlsServer(s) => *s,
        _ => unreachable!("intercept() only ever returns a TlsServer transport"),
    };
    serve_mitm_http(&mut inner_client, server_transport, options, mode, channel, next_flow_id, host, port).await
}

async fn dial_server_tls(server_stream: TcpStream, host: &str) -> Result<Transport> {
    let (transport, _) = dial_server_tls_with_alpn(server_stream, host).await?;
    Ok(transport)
}

async fn dial_server_tls_with_alpn(server_stream: TcpStream, host: &str) -> Result<(Transport, Option<Vec<u8>>)> {
    use futures_rustls::TlsConnector;
    use futures_rustls::rustls::ClientConfig;
    use rustls_pki_types::ServerName;

    let roots = rustls_native_certs::load_native_certs().certs;
    let mut root_store = futures_rustls::rustls::RootCertStore::empty();
    for cert in roots {
        let _ = root_store.add(cert);
    }
    let mut config = ClientConfig::builder().with_root_certificates(root_store).with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string()).map_err(|_| ProxyError::InvalidServerCertificate(format!("invalid hostname: {host}")))?;
    let stream = connector
        .connect(server_name, server_stream)
        .await
        .map_err(|e| ProxyError::InvalidServerCertificate(e.to_string()))?;
    let alpn = stream.get_ref().1.alpn_protocol().map(|p| p.to_vec());
    Ok((Transport::TlsClient(Box::new(stream)), alpn))
}

/// Runs the HTTP/1 request loop over an already-MITM'd connection: both
/// legs are plaintext to us now, framing and forwarding work exactly
/// like the non-TLS path, just over TLS-wrapped transports.
#[allow(clippy::too_many_arguments)]
async fn serve_mitm_http(
    client: &mut futures_rustls::server::TlsStream<TcpStream>,
    server: Transport,
    options: &Options,
    mode: &Mode,
    channel: &Channel,
    next_flow_id: &mut impl FnMut() -> u64,
    host: String,
    port: u16,
) -> Result<()> {
    let mut server = server;
    // One `BufferedReader` for the whole MITM'd connection, not one per
    // request: `client` is a live TLS stream, and any bytes the reader
    // prefetches past a request's end (the start of the next pipelined
    // request) have to survive into the next loop iteration rather than
    // being discarded, exactly like the plaintext path's `reader` in
    // `serve`.
    let mut reader = BufferedReader::new(ByRef(client));
    loop {
        if channel.should_exit().await {
            return Ok(());
        }

        let mut req = match http1::read_request_head(&mut reader).await {
            Ok(req) => req,
            Err(ProxyError::HttpReadDisconnect(_)) => return Ok(()),
            Err(e) => return respond_with_protocol_error(&mut *reader.get_mut().0, channel, e).await,
        };
        let framing = match http1::expected_request_body_size(&req) {
            Ok(f) => f,
            Err(e) => return respond_with_protocol_error(&mut *reader.get_mut().0, channel, e).await,
        };
        req.content = match http1::read_body(&mut reader, framing, options.body_size_limit).await {
            Ok(c) => Some(c),
            Err(e) => return respond_with_protocol_error(&mut *reader.get_mut().0, channel, e).await,
        };
        if framing == http1::BodyFraming::Chunked {
            http1::rechunk_as_known_length(&mut req.headers, req.content.as_ref().unwrap().len());
        }

        let flow_id = next_flow_id();
        let mut flow = HTTPFlow::new(flow_id, flow_mode(mode), req);
        flow.server_address = Some((host.clone(), port));
        channel.tell(Event::HttpRequestHeaders(streamed_request_copy(&flow, options))).await;

        let close_after = http1::connection_close(&flow.request.http_version, &flow.request.headers);
        strip_hop_by_hop_headers(&mut flow.request.headers);

        let head = http1::assemble_request_head(&flow.request);
        transport_write(&mut server, &head).await?;
        if let Some(body) = &flow.request.content {
            transport_write(&mut server, body).await?;
        }

        let mut server_reader_buf = Vec::new();
        let resp = read_response_from_transport(&mut server, &mut server_reader_buf, options, flow.request.method.eq_ignore_ascii_case("HEAD")).await;
        let mut resp = match resp {
            Ok(r) => r,
            Err(e) => {
                flow.error = Some(crate::flow::FlowError::new(e.to_string()));
                make_error_response(502, "Bad Gateway")
            }
        };
        crate::addons::core::apply_default_headers(&mut resp);
        strip_hop_by_hop_headers(&mut resp.headers);

        let mut out = http1::assemble_response_head(&resp);
        if let Some(body) = &resp.content {
            out.extend_from_slice(body);
        }
        let client_ref = &mut *reader.get_mut().0;
        futures_lite::AsyncWriteExt::write_all(client_ref, &out).await.map_err(ProxyError::Tcp)?;
        futures_lite::AsyncWriteExt::flush(client_ref).await.map_err(ProxyError::Tcp)?;

        resp.content = crate::addons::streambodies::addon_visible_content(
            resp.content.take().unwrap_or_default(),
            options.stream_large_bodies,
        );
        flow.response = Some(resp);
        channel.tell(Event::HttpResponse(flow)).await;

        if close_after {
            return Ok(());
        }
    }
}

async fn transport_write(transport: &mut Transport, data: &[u8]) -> Result<()> {
    match transport {
        Transport::Plain(s) => crate::io::write_all(s, data).await,
        Transport::TlsServer(s) => crate::io::write_all(&mut **s, data).await,
        Transport::TlsClient(s) => crate::io::write_all(&mut **s, data).await,
    }
}

async fn read_response_from_transport(
    transport: &mut Transport,
    _scratch: &mut Vec<u8>,
    options: &Options,
    no_body: bool,
) -> Result<Response> {
    match transport {
        Transport::Plain(s) => read_response_generic(s, options, no_body).await,
        Transport::TlsServer(s) => read_response_generic(&mut **s, options, no_body).await,
        Transport::TlsClient(s) => read_response_generic(&mut **s, options, no_body).await,
    }
}

async fn read_response_generic<S: futures_lite::AsyncRead + Unpin>(
    stream: &mut S,
    options: &Options,
    no_body: bool,
) -> Result<Response>
where
    S: Sized,
{
    let mut reader = BufferedReader::new(ByRef(stream));
    let mut resp = http1::read_response_head(&mut reader).await?;
    let framing = http1::expected_response_body_size(&resp, no_body)?;
    resp.content = Some(http1::read_body(&mut reader, framing, options.body_size_limit).await?);
    if framing == http1::BodyFraming::Chunked {
        http1::rechunk_as_known_length(&mut resp.headers, resp.content.as_ref().unwrap().len());
    }
    resp.timestamp_end = Some(now());
    Ok(resp)
}

/// Turns a protocol error raised while reading a request into a 502 sent
/// back to the client before the connection closes. Mirrors the original
/// connection handler's top-level `except ProtocolException` catch, which
/// answers `make_error_response(502, repr(e))` regardless of which
/// `ProtocolException` subclass (`HttpSyntaxException`, `HttpException`, ...)
/// was actually raised — so a malformed request (e.g. conflicting
/// `Content-Length` headers) gets a real HTTP response rather than a bare
/// connection close.
async fn respond_with_protocol_error<S: futures_lite::AsyncWrite + Unpin>(
    client: &mut S,
    channel: &Channel,
    err: ProxyError,
) -> Result<()> {
    channel.log(crate::channel::LogLevel::Warn, format!("protocol error: {err}")).await;
    let resp = make_error_response(502, &err.to_string());
    let mut out = http1::assemble_response_head(&resp);
    if let Some(body) = &resp.content {
        out.extend_from_slice(body);
    }
    crate::io::write_all(client, &out).await
}

/// `BufferedReader` needs ownership of its inner stream; callers that
/// only hold `&mut S` (the transport outlives the read) proxy through
/// this adapter so reads forward without moving the original value.
struct ByRef<'a, S>(&'a mut S);

impl<'a, S: futures_lite::AsyncRead + Unpin> futures_lite::AsyncRead for ByRef<'a, S> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut [u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut *self.get_mut().0).poll_read(cx, buf)
    }
}
