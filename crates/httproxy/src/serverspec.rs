//! Parses `scheme://host:port` specs used for `upstream:` mode and SOCKS
//! upstream arguments (spec §4.C), grounded in
//! `original_source/wireproxy/thirdparty/mitmproxy/net/server_spec.py` and
//! the teacher's `BindAddr: FromStr` pattern in `crates/httproxy/src/cmd`.

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Socks4,
    Socks5,
    Socks5h,
}

impl Scheme {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "socks4" => Some(Scheme::Socks4),
            "socks5" => Some(Scheme::Socks5),
            "socks5h" => Some(Scheme::Socks5h),
            _ => None,
        }
    }

    pub fn is_socks(self) -> bool {
        matches!(self, Scheme::Socks4 | Scheme::Socks5 | Scheme::Socks5h)
    }

    fn default_port(self) -> Option<u16> {
        match self {
            Scheme::Http => Some(80),
            Scheme::Https => Some(443),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

/// Parses a server mode specification, e.g. `http://example.com/`,
/// `example.org`, `socks5://127.0.0.1:1080`.
pub fn parse(spec: &str) -> Result<ServerSpec> {
    let spec = spec.trim();
    let (scheme_str, rest) = match spec.split_once("://") {
        Some((s, r)) => (Some(s), r),
        None => (None, spec),
    };
    let rest = rest.trim_end_matches('/');

    // IPv6 bracket form `[::1]:port`, otherwise split on the last colon that
    // isn't part of a bracketed address.
    let (host, port_str) = if let Some(end) = rest.find(']') {
        if !rest.starts_with('[') {
            return Err(invalid(spec));
        }
        let host = &rest[1..end];
        let remainder = &rest[end + 1..];
        let port = remainder.strip_prefix(':');
        (host.to_string(), port.map(|p| p.to_string()))
    } else {
        match rest.rsplit_once(':') {
            Some((h, p)) if !h.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (h.to_string(), Some(p.to_string()))
            }
            _ => (rest.to_string(), None),
        }
    };

    if host.is_empty() {
        return Err(invalid(spec));
    }

    // Defaulting to https is secure-by-default, matching the original.
    let scheme = match scheme_str {
        Some(s) => Scheme::from_str(s).ok_or_else(|| invalid(spec))?,
        None => Scheme::Https,
    };

    let port = match port_str {
        Some(p) => p.parse::<u16>().map_err(|_| invalid(spec))?,
        None => scheme
            .default_port()
            .ok_or_else(|| ProxyError::HttpSyntax(format!("you need to specify a port when using {scheme_str:?}")))?,
    };

    if port == 0 {
        return Err(invalid(spec));
    }

    Ok(ServerSpec { scheme, host, port })
}

/// Parses a `mode:server-spec` string, e.g. `upstream:http://proxy:3128`.
pub fn parse_with_mode(mode: &str) -> Result<(String, ServerSpec)> {
    let (mode, spec) = mode.split_once(':').ok_or_else(|| invalid(mode))?;
    Ok((mode.to_string(), parse(spec)?))
}

fn invalid(spec: &str) -> ProxyError {
    ProxyError::HttpSyntax(format!("invalid server specification: {spec}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scheme_to_https_and_port_to_443() {
        let s = parse("example.org").unwrap();
        assert_eq!(s.scheme, Scheme::Https);
        assert_eq!(s.host, "example.org");
        assert_eq!(s.port, 443);
    }

    #[test]
    fn explicit_scheme_and_port() {
        let s = parse("http://example.com:8080").unwrap();
        assert_eq!(s.scheme, Scheme::Http);
        assert_eq!(s.port, 8080);
    }

    #[test]
    fn socks_requires_explicit_port() {
        assert!(parse("socks5://proxyhost").is_err());
        let s = parse("socks5://proxyhost:1080").unwrap();
        assert_eq!(s.port, 1080);
    }

    #[test]
    fn parse_with_mode_splits_mode_prefix() {
        let (mode, spec) = parse_with_mode("upstream:http://p:3128").unwrap();
        assert_eq!(mode, "upstream");
        assert_eq!(spec.host, "p");
        assert_eq!(spec.port, 3128);
    }

    #[test]
    fn ipv6_host_is_supported() {
        let s = parse("http://[::1]:8080").unwrap();
        assert_eq!(s.host, "::1");
        assert_eq!(s.port, 8080);
    }
}
