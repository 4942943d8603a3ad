//! Integration tests driving a real `ProxyServer` over a loopback listener
//! against an in-process fake origin server, covering the spec's
//! scenarios 1 (absolute-form GET), 3 (chunked reassembly) and 4
//! (conflicting `Content-Length` -> 502) end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_lite::{AsyncReadExt, AsyncWriteExt};
use httproxy::channel::event_bus;
use httproxy::{Options, ProxyServer, Shutdown};
use smol::Timer;
use smol::net::{TcpListener, TcpStream};

/// Starts a `ProxyServer` in regular mode on an ephemeral loopback port,
/// draining its event bus in the background and answering the
/// `clientconnect` ask with `Continue` (these tests don't exercise addon
/// veto behavior, just need the accept loop to not block on it). Returns
/// the bound address, the shutdown handle to call `initiate()` on, and
/// the task driving `run()` to join after.
async fn start_proxy() -> (SocketAddr, Shutdown, smol::Task<()>) {
    let mut options = Options::default();
    options.listen_port = 0;

    let (event_tx, event_rx) = event_bus();
    smol::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            if let httproxy::channel::Event::ClientConnect { reply, .. } = event {
                let _ = reply.send(httproxy::channel::Reply::Continue(())).await;
            }
        }
    })
    .detach();

    let server = Arc::new(ProxyServer::new(options, event_tx).unwrap());
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let run_server = server.clone();
    let task = smol::spawn(async move {
        run_server.run(run_shutdown).await.unwrap();
    });

    let addr = loop {
        if let Some(addr) = server.local_addr().await {
            break addr;
        }
        Timer::after(Duration::from_millis(2)).await;
    };

    (addr, shutdown, task)
}

async fn stop_proxy(shutdown: Shutdown, task: smol::Task<()>) {
    shutdown.initiate();
    task.await;
}

/// Accepts exactly one connection, reads until the blank line terminating
/// the request head (ignoring its contents — these scenarios don't need a
/// request body on the origin leg), then writes `response` verbatim.
async fn serve_one_canned_response(listener: TcpListener, response: &'static [u8]) {
    let (mut conn, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = conn.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    conn.write_all(response).await.unwrap();
    let _ = conn.flush().await;
}

async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let marker = b"\r\n\r\n";
    let pos = raw
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("response head terminator");
    (&raw[..pos], &raw[pos + marker.len()..])
}

/// Scenario 1: absolute-form GET through the proxy to a plain origin.
#[test]
fn absolute_form_get_is_forwarded_and_response_relayed() {
    smol::block_on(async {
        let (proxy_addr, shutdown, task) = start_proxy().await;

        let origin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin_listener.local_addr().unwrap();
        let origin = smol::spawn(serve_one_canned_response(
            origin_listener,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
        ));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let request = format!(
            "GET http://{origin_addr}/ HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let raw = read_all(&mut client).await;
        let (head, body) = split_head_body(&raw);
        let head = String::from_utf8_lossy(head);
        assert!(head.starts_with("HTTP/1.1 200"), "unexpected status line: {head:?}");
        assert_eq!(body, b"hi");

        origin.await;
        stop_proxy(shutdown, task).await;
    });
}

/// Scenario 3: origin responds with a chunked body; the proxy decodes it
/// and the client sees the reassembled bytes (re-framed with an accurate
/// `Content-Length` rather than a now-meaningless `Transfer-Encoding`).
#[test]
fn chunked_origin_response_is_reassembled() {
    smol::block_on(async {
        let (proxy_addr, shutdown, task) = start_proxy().await;

        let origin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin_listener.local_addr().unwrap();
        let origin = smol::spawn(serve_one_canned_response(
            origin_listener,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        ));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let request = format!(
            "GET http://{origin_addr}/ HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let raw = read_all(&mut client).await;
        let (head, body) = split_head_body(&raw);
        let head = String::from_utf8_lossy(head);
        assert!(head.starts_with("HTTP/1.1 200"), "unexpected status line: {head:?}");
        assert!(!head.to_ascii_lowercase().contains("transfer-encoding"));
        assert!(head.to_ascii_lowercase().contains("content-length: 5"));
        assert_eq!(body, b"hello");

        origin.await;
        stop_proxy(shutdown, task).await;
    });
}

/// Scenario 4: a request with two conflicting `Content-Length` headers
/// never reaches an origin at all — the proxy answers 502 with the
/// error-HTML template and closes the connection.
#[test]
fn conflicting_content_length_yields_502() {
    smol::block_on(async {
        let (proxy_addr, shutdown, task) = start_proxy().await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let request = b"POST http://example.com/ HTTP/1.1\r\nHost: example.com\r\nContent-Length: 10\r\nContent-Length: 11\r\n\r\n0123456789";
        client.write_all(request).await.unwrap();
        client.flush().await.unwrap();

        let raw = read_all(&mut client).await;
        let (head, body) = split_head_body(&raw);
        let head = String::from_utf8_lossy(head);
        assert!(head.starts_with("HTTP/1.1 502"), "unexpected status line: {head:?}");
        assert!(String::from_utf8_lossy(body).contains("502"));

        stop_proxy(shutdown, task).await;
    });
}
