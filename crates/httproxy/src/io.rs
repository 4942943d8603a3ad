//! I/O primitives: a buffered line/byte reader with first-byte timestamping,
//! generic over anything that looks like a socket — plain TCP or a TLS
//! session (spec §4.A).

use futures_lite::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ProxyError, Result};

/// A socket-like type usable on either side of the proxy: plain TCP or a TLS
/// record layer. Implemented for `smol::net::TcpStream` and
/// `futures_rustls::client::TlsStream`/`server::TlsStream`.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Buffers reads from an underlying stream and exposes `readline`/`read`
/// with EOF and disconnect semantics matching the original `rfile` contract.
pub struct BufferedReader<S> {
    inner: S,
    buf: Vec<u8>,
    pos: usize,
    pub first_byte_timestamp: f64,
    seen_byte: bool,
}

impl<S: AsyncRead + Unpin> BufferedReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            first_byte_timestamp: now(),
            seen_byte: false,
        }
    }

    pub fn reset_timestamps(&mut self) {
        self.seen_byte = false;
    }

    fn mark_first_byte(&mut self) {
        if !self.seen_byte {
            self.seen_byte = true;
            self.first_byte_timestamp = now();
        }
    }

    async fn fill(&mut self) -> std::io::Result<usize> {
        if self.pos < self.buf.len() {
            return Ok(self.buf.len() - self.pos);
        }
        let mut tmp = [0u8; 8192];
        let n = self.inner.read(&mut tmp).await?;
        if n > 0 {
            self.mark_first_byte();
            self.buf = tmp[..n].to_vec();
            self.pos = 0;
        }
        Ok(n)
    }

    /// Reads up to and including the terminating `\n`. Empty return means
    /// EOF. `max` bounds how many bytes are scanned before giving up (the
    /// line is still returned truncated at `max`, matching `read_chunked`'s
    /// bounded `readline(128)`/`readline(5)` usage).
    pub async fn readline(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            if self.pos >= self.buf.len() {
                let n = self.fill().await.map_err(ProxyError::Tcp)?;
                if n == 0 {
                    return Ok(line);
                }
            }
            while self.pos < self.buf.len() {
                let b = self.buf[self.pos];
                self.pos += 1;
                line.push(b);
                if b == b'\n' || line.len() >= max {
                    return Ok(line);
                }
            }
        }
    }

    /// Reads exactly `n` bytes, only short on EOF.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.pos >= self.buf.len() {
                let read = self.fill().await.map_err(ProxyError::Tcp)?;
                if read == 0 {
                    break;
                }
            }
            let take = (n - out.len()).min(self.buf.len() - self.pos);
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Writes `data` and flushes, raising a typed disconnect error on failure.
pub async fn write_all<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<()> {
    w.write_all(data).await.map_err(ProxyError::Tcp)?;
    w.flush().await.map_err(ProxyError::Tcp)?;
    Ok(())
}
