//! The transport a layer reads and writes (spec §3, §4.D): either side of
//! a connection is plain TCP until a TLS handshake (client MITM or
//! outbound to the origin) wraps it.

use futures_rustls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};
use smol::net::TcpStream;

/// Either side of a TLS handshake, or no TLS at all.
pub enum Transport {
    Plain(TcpStream),
    TlsServer(Box<ServerTlsStream<TcpStream>>),
    TlsClient(Box<ClientTlsStream<TcpStream>>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }
}
