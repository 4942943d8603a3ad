//! TLS interception: terminates the client's TLS session with a leaf
//! certificate minted on the fly for the CONNECT target, so everything
//! above this layer (the HTTP/1 codec, addons) sees plaintext.
//!
//! Grounded in the hudsucker/`RcgenAuthority` shape referenced by
//! `epli2-phantom`'s capture backend, reimplemented directly against
//! `rustls`/`futures-rustls` instead of depending on hudsucker.

use std::sync::Arc;

use futures_rustls::TlsAcceptor;
use futures_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use futures_rustls::rustls::sign::CertifiedKey;
use futures_rustls::rustls::{ServerConfig, crypto::ring::sign::any_supported_type};
use smol::net::TcpStream;

use crate::ca::CertificateAuthority;
use crate::connection::Transport;
use crate::error::{ProxyError, Result};

/// ALPN protocols offered to the client during the MITM handshake. `h2`
/// comes first only to mirror real servers; we don't speak HTTP/2
/// ourselves, so a client that picks it gets handed to `rawtcp` as an
/// opaque relay once negotiation settles (spec's ALPN fallback rule).
const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

struct MintingResolver {
    ca: Arc<dyn CertificateAuthority>,
    fallback_host: String,
}

impl ResolvesServerCert for MintingResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello
            .server_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.fallback_host.clone());
        let leaf = self.ca.mint(&host, &[host.clone()]).ok()?;
        let key = any_supported_type(&leaf.private_key()).ok()?;
        Some(Arc::new(CertifiedKey::new(vec![leaf.cert_der], key)))
    }
}

/// Performs the server-side TLS handshake with the client, presenting a
/// certificate minted for `host`. Returns the TLS-wrapped transport and
/// whatever ALPN protocol was negotiated.
pub async fn intercept(
    client: TcpStream,
    host: &str,
    ca: &Arc<dyn CertificateAuthority>,
) -> Result<(Transport, Option<Vec<u8>>)> {
    let resolver = MintingResolver {
        ca: ca.clone(),
        fallback_host: host.to_string(),
    };

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    let acceptor = TlsAcceptor::from(Arc::new(config));
    let stream = acceptor
        .accept(client)
        .await
        .map_err(|e| ProxyError::ClientHandshake { server: host.to_string(), reason: e.to_string() })?;

    let alpn = stream.get_ref().1.alpn_protocol().map(|p| p.to_vec());
    Ok((Transport::TlsServer(Box::new(stream)), alpn))
}

/// Whether a peeked byte looks like the start of a TLS ClientHello
/// (record type 0x16, handshake). Used to decide whether a CONNECT
/// tunnel should be MITM'd at all, or relayed opaquely when the client
/// turns out not to speak TLS on this port.
pub fn looks_like_tls_client_hello(first_byte: u8) -> bool {
    first_byte == 0x16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::RcgenAuthority;
    use futures_rustls::TlsConnector;
    use futures_rustls::rustls::ClientConfig;
    use futures_rustls::rustls::RootCertStore;
    use rustls_pki_types::ServerName;
    use smol::net::{TcpListener, TcpStream};

    /// Drives a full loopback handshake: `intercept()` on one end, a real
    /// `rustls` client (trusting the CA we minted against) on the other.
    /// Confirms the leaf `intercept()` presents is the one `ca.mint()`
    /// signed for the requested host, and that offering `http/1.1`/`h2`
    /// negotiates `http/1.1` when the client only supports it (scenario
    /// 2's cert path and scenario 6's ALPN fallback precondition).
    #[test]
    fn intercept_presents_a_leaf_for_the_requested_host_and_negotiates_alpn() {
        smol::block_on(async {
            let ca: Arc<dyn CertificateAuthority> = Arc::new(RcgenAuthority::generate("test CA").unwrap());
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let server_ca = ca.clone();
            let server = smol::spawn(async move {
                let (conn, _) = listener.accept().await.unwrap();
                intercept(conn, "example.com", &server_ca).await.unwrap()
            });

            let client_conn = TcpStream::connect(addr).await.unwrap();
            let mut root_store = RootCertStore::empty();
            root_store.add(ca.ca_cert_der()).unwrap();
            let mut config = ClientConfig::builder().with_root_certificates(root_store).with_no_client_auth();
            config.alpn_protocols = vec![b"http/1.1".to_vec()];
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from("example.com".to_string()).unwrap();
            let client_tls = connector.connect(server_name, client_conn).await.unwrap();

            let client_alpn = client_tls.get_ref().1.alpn_protocol().map(|p| p.to_vec());
            assert_eq!(client_alpn.as_deref(), Some(b"http/1.1".as_slice()));

            let (_server_transport, server_alpn) = server.await;
            assert_eq!(server_alpn.as_deref(), Some(b"http/1.1".as_slice()));
        });
    }

    #[test]
    fn client_hello_first_byte_is_recognized() {
        assert!(looks_like_tls_client_hello(0x16));
        assert!(!looks_like_tls_client_hello(0x47));
    }
}
