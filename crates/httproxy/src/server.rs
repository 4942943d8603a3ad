//! The proxy server: binds the listening socket, accepts connections,
//! and dispatches each to the layer stack appropriate for `Options::mode`
//! (spec §4.G, grounded in the teacher's `start::handle_local_target`/
//! `accept_or_shutdown` accept loop, generalized from a single hard-coded
//! protocol to mode-driven dispatch).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mea::mutex::Mutex as AsyncMutex;
use smol::future;
use smol::net::{TcpListener, TcpStream};

use crate::ca::{CertificateAuthority, RcgenAuthority};
use crate::channel::{Channel, Event, LogLevel, Reply};
use crate::error::{ProxyError, Result};
use crate::init::shutdown::GracefulShutdown;
use crate::layers::http_forward;
use crate::options::Options;

/// Owns the listening socket and everything a connection handler needs
/// to be spawned: the shared options, CA, event bus sender, and the
/// flow-id counter (monotonic across the server's lifetime).
pub struct ProxyServer {
    options: Arc<Options>,
    ca: Arc<dyn CertificateAuthority>,
    event_tx: smol::channel::Sender<Event>,
    should_exit: Arc<AsyncMutex<bool>>,
    next_flow_id: Arc<AtomicU64>,
    bound_addr: Arc<AsyncMutex<Option<SocketAddr>>>,
}

impl ProxyServer {
    pub fn new(options: Options, event_tx: smol::channel::Sender<Event>) -> Result<Self> {
        let ca = RcgenAuthority::generate("httproxy MITM CA")?;
        Ok(Self {
            options: Arc::new(options),
            ca: Arc::new(ca),
            event_tx,
            should_exit: Arc::new(AsyncMutex::new(false)),
            next_flow_id: Arc::new(AtomicU64::new(1)),
            bound_addr: Arc::new(AsyncMutex::new(None)),
        })
    }

    /// The CA's root certificate, DER-encoded, for clients that need to
    /// trust it explicitly (the `acceptInsecureCerts` driver config
    /// assumes the client ignores validation instead; this is here for
    /// embedders that install the root properly).
    pub fn ca_certificate_der(&self) -> rustls_pki_types::CertificateDer<'static> {
        self.ca.ca_cert_der()
    }

    /// The actual bound address once `run()` has started listening —
    /// needed by an embedder building [`crate::driver::DriverConfig`]
    /// when `Options::listen_port` is `0` and an ephemeral port was
    /// picked. `None` before `run()` binds the listener.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().await
    }

    pub async fn run(&self, shutdown: GracefulShutdown) -> Result<()> {
        let bind_addr: SocketAddr = format!("{}:{}", self.options.listen_host, self.options.listen_port)
            .parse()
            .map_err(|e| ProxyError::Server(format!("invalid listen address: {e}")))?;

        let listener = TcpListener::bind(bind_addr).await.map_err(ProxyError::Tcp)?;
        let local_addr = listener.local_addr().map_err(ProxyError::Tcp)?;
        *self.bound_addr.lock().await = Some(local_addr);
        log::info!("httproxy listening on {local_addr} in {:?} mode", self.options.mode.0);

        loop {
            let Some((stream, peer)) = accept_or_shutdown(&listener, &shutdown).await? else {
                break;
            };

            let options = self.options.clone();
            let ca = self.ca.clone();
            let event_tx = self.event_tx.clone();
            let should_exit = self.should_exit.clone();
            let next_flow_id = self.next_flow_id.clone();
            let shutdown = shutdown.clone();

            smol::spawn(async move {
                let _guard = shutdown.inflight_guard();
                let channel = Channel::new(event_tx, should_exit);
                let vetoed = matches!(channel.ask_client_connect(peer).await, Reply::Kill);
                if !vetoed {
                    if let Err(err) = handle_connection(stream, peer, &options, &ca, &channel, next_flow_id).await {
                        if !crate::addons::core::is_kill(&err) {
                            let level = err.log_level(options.suppress_connection_errors);
                            channel.log(to_channel_level(level), format!("peer={peer} error: {err}")).await;
                            log::log!(level, "peer={peer} error: {err}");
                        }
                    }
                } else {
                    log::debug!("peer={peer} connection vetoed by addon at clientconnect");
                }
                channel.tell(Event::ClientDisconnect(peer)).await;
            })
            .detach();
        }

        shutdown.wait_inflight_zero().await;
        Ok(())
    }
}

async fn accept_or_shutdown(
    listener: &TcpListener,
    shutdown: &GracefulShutdown,
) -> Result<Option<(TcpStream, SocketAddr)>> {
    let accept_fut = async { listener.accept().await.map(Some) };
    let shutdown_fut = async {
        shutdown.wait_shutting_down().await;
        Ok(None)
    };
    future::or(accept_fut, shutdown_fut).await.map_err(ProxyError::Tcp)
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    options: &Options,
    ca: &Arc<dyn CertificateAuthority>,
    channel: &Channel,
    next_flow_id: Arc<AtomicU64>,
) -> Result<()> {
    log::debug!("peer={peer} connection accepted");
    let mode = options.mode.parse()?;

    match mode {
        crate::options::Mode::Transparent => {
            // No platform backend ships with this crate; fail the
            // connection loudly rather than silently treating it as
            // regular mode (see layers::transparent).
            let _ = crate::layers::transparent::original_destination(peer)?;
            unreachable!("original_destination always errs without a platform backend")
        }
        _ => {
            http_forward::serve(stream, options, ca, channel, move || next_flow_id.fetch_add(1, Ordering::Relaxed)).await
        }
    }
}

fn to_channel_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}
