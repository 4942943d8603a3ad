//! Command-line surface for the standalone `httproxy` binary, translating
//! flags into an [`Options`](crate::options::Options) the library API also
//! accepts directly. Grounded in the teacher's `sarge`-based `cmd::Args`
//! (`rproxy::cmd`), reworked onto `clap` since the spec's configuration
//! surface (mode strings, upstream auth, no-proxy sets, size limits) is
//! richer than the teacher's two bind addresses.

use std::collections::HashSet;

use anyhow::Result;
use clap::Parser;

use crate::options::Options;

#[derive(Debug, Parser)]
#[command(name = "httproxy", about = "Intercepting HTTP(S)/TCP proxy core")]
pub struct Args {
    /// Address to listen on.
    #[arg(short = 'l', long, default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Port to listen on; 0 picks an ephemeral port.
    #[arg(short = 'p', long, default_value_t = 8080)]
    pub listen_port: u16,

    /// `regular`, `transparent`, `socks5`, or `upstream:<scheme>://host[:port]`.
    #[arg(short = 'm', long, default_value = "regular")]
    pub mode: String,

    /// `user:pass` sent as `Proxy-Authorization` to an HTTP upstream.
    #[arg(long)]
    pub upstream_auth: Option<String>,

    /// Verbatim `Proxy-Authorization` value, overriding `--upstream-auth`.
    #[arg(long)]
    pub upstream_custom_auth: Option<String>,

    /// Comma-separated hosts that bypass the configured upstream proxy.
    #[arg(long, value_delimiter = ',')]
    pub no_proxy: Vec<String>,

    /// Log connection-level errors at `debug` instead of `warn`.
    #[arg(long)]
    pub suppress_connection_errors: bool,

    /// Maximum bytes for any single request/response body; 0 disables the limit.
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    pub body_size_limit: usize,

    /// Body size past which addons see `content: None` (spec's streaming signal); 0 disables.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    pub stream_large_bodies: usize,

    /// Comma-separated ports MITM'd with TLS after CONNECT (others relay opaquely).
    #[arg(long, default_value = "443,8443", value_delimiter = ',')]
    pub tls_ports: Vec<u16>,

    /// Skip certificate validation when dialing origins over TLS.
    #[arg(long)]
    pub ssl_insecure: bool,

    /// "" disables logging, or one of off/error/warn/info/debug/trace.
    #[arg(short = 'v', long, default_value = "info")]
    pub log_level: String,

    /// Colorize log output.
    #[arg(long)]
    pub colored: bool,
}

impl From<Args> for Options {
    fn from(args: Args) -> Self {
        Options {
            listen_host: args.listen_host,
            listen_port: args.listen_port,
            mode: crate::options::ModeString(args.mode),
            upstream_auth: args.upstream_auth,
            upstream_custom_auth: args.upstream_custom_auth,
            no_proxy: args.no_proxy.into_iter().filter(|h| !h.is_empty()).collect::<HashSet<_>>(),
            suppress_connection_errors: args.suppress_connection_errors,
            body_size_limit: if args.body_size_limit == 0 { None } else { Some(args.body_size_limit) },
            stream_large_bodies: if args.stream_large_bodies == 0 { None } else { Some(args.stream_large_bodies) },
            tls_ports: args.tls_ports.into_iter().collect(),
            ssl_insecure: args.ssl_insecure,
        }
    }
}

/// Parses argv, installs the logger, and returns the resulting [`Options`].
pub fn init() -> Result<Options> {
    let args = Args::parse();
    if !args.log_level.is_empty() {
        crate::init::logger::init(&args.log_level, args.colored)?;
    }
    log::debug!("{args:?}");
    Ok(args.into())
}
