//! The proxy's exception taxonomy (spec §7).
//!
//! Layers never swallow errors silently; a [`ProxyError`] always propagates up
//! to the connection handler in [`crate::server`], which is the single place
//! that turns it into a logged message, an addon event, and (for protocol
//! errors that occur before a response has started) a synthesized 502.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The peer closed the connection before a full message could be read.
    #[error("{0}")]
    HttpReadDisconnect(String),

    /// Malformed HTTP: bad request/status line, bad headers, conflicting
    /// `Content-Length`, broken chunked framing.
    #[error("{0}")]
    HttpSyntax(String),

    /// A semantically invalid HTTP exchange: body too large, unexpected EOF
    /// mid-body, or other framing violation that isn't a syntax error.
    #[error("{0}")]
    Http(String),

    /// The underlying TCP socket disconnected.
    #[error("tcp disconnect: {0}")]
    TcpDisconnect(String),

    /// A TCP-level I/O failure.
    #[error("tcp error: {0}")]
    Tcp(#[from] std::io::Error),

    /// TLS handshake or record-layer failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// The client failed to complete the MITM handshake (e.g. it doesn't
    /// trust the proxy's minted certificate).
    #[error("client handshake failed for {server}: {reason}")]
    ClientHandshake { server: String, reason: String },

    /// The upstream server presented a certificate that failed validation.
    #[error("invalid server certificate: {0}")]
    InvalidServerCertificate(String),

    /// An addon cooperatively aborted the flow. Not logged as a warning.
    #[error("flow killed by addon")]
    Kill,

    /// Fatal startup error (e.g. bind failure). Propagated to the embedder.
    #[error("server error: {0}")]
    Server(String),
}

impl ProxyError {
    /// Whether this error should be logged quietly (`debug`) rather than as a
    /// `warn`, honoring `Options::suppress_connection_errors`.
    pub fn log_level(&self, suppress_connection_errors: bool) -> log::Level {
        match self {
            ProxyError::ClientHandshake { .. } => log::Level::Debug,
            ProxyError::InvalidServerCertificate(_) => log::Level::Warn,
            _ if suppress_connection_errors => log::Level::Debug,
            _ => log::Level::Warn,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
