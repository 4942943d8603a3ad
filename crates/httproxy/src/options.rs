//! The configuration surface (spec §3 "Options", §6 "Configuration surface").

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};
use crate::serverspec::{self, ServerSpec};

/// `mode` strings: `regular`, `transparent`, `upstream:<spec>`, `socks5`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Mode {
    Regular,
    Transparent,
    Upstream(ServerSpec),
    Socks5,
}

impl Mode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "regular" => Ok(Mode::Regular),
            "transparent" => Ok(Mode::Transparent),
            "socks5" => Ok(Mode::Socks5),
            s if s.starts_with("upstream:") => {
                let (_, spec) = serverspec::parse_with_mode(s)?;
                Ok(Mode::Upstream(spec))
            }
            other => Err(ProxyError::Server(format!("unknown proxy mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    pub listen_host: String,
    pub listen_port: u16,
    pub mode: ModeString,
    /// `user:pass` for `Proxy-Authorization` against the upstream proxy.
    pub upstream_auth: Option<String>,
    /// Verbatim replacement for the `Proxy-Authorization` header.
    pub upstream_custom_auth: Option<String>,
    /// Hosts that bypass the upstream proxy entirely.
    pub no_proxy: HashSet<String>,
    pub suppress_connection_errors: bool,
    pub body_size_limit: Option<usize>,
    pub stream_large_bodies: Option<usize>,
    /// Ports on which a CONNECT tunnel is MITM'd with TLS rather than
    /// relayed opaquely.
    pub tls_ports: HashSet<u16>,
    pub ssl_insecure: bool,
}

/// Thin newtype so `Options` can carry the raw mode string (serializable)
/// while exposing the parsed `Mode` on demand; mirrors the original's
/// "mode is just a string, parsed lazily" behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeString(pub String);

impl ModeString {
    pub fn parse(&self) -> Result<Mode> {
        Mode::parse(&self.0)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            mode: ModeString("regular".to_string()),
            upstream_auth: None,
            upstream_custom_auth: None,
            no_proxy: HashSet::new(),
            suppress_connection_errors: false,
            body_size_limit: Some(100 * 1024 * 1024),
            stream_large_bodies: Some(4 * 1024 * 1024),
            tls_ports: [443, 8443].into_iter().collect(),
            ssl_insecure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upstream_mode() {
        let mode = Mode::parse("upstream:http://proxy:3128").unwrap();
        matches!(mode, Mode::Upstream(_));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Mode::parse("bogus").is_err());
    }
}
