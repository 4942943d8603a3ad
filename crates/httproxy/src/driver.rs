//! The dictionary handed back to the embedding browser-driver glue so it
//! can point a WebDriver session at this proxy (spec §6 "Driver-visible
//! config"). Grounded directly in spec §6's literal shape — this is the
//! one part of the embedding surface the spec pins to an exact JSON
//! structure, since it's serialized straight into a WebDriver
//! `Capabilities` object rather than consumed as Rust types by the
//! caller.

use std::net::SocketAddr;

use serde::Serialize;

use crate::options::Options;

#[derive(Debug, Clone, Serialize)]
pub struct ProxyConfig {
    #[serde(rename = "proxyType")]
    pub proxy_type: &'static str,
    #[serde(rename = "httpProxy")]
    pub http_proxy: String,
    #[serde(rename = "sslProxy")]
    pub ssl_proxy: String,
    #[serde(rename = "noProxy", skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverConfig {
    pub proxy: ProxyConfig,
    #[serde(rename = "acceptInsecureCerts")]
    pub accept_insecure_certs: bool,
}

impl DriverConfig {
    /// Builds the config for a proxy bound to `addr` (its actual bound
    /// address — `Options::listen_port: 0` picks an ephemeral one, so
    /// callers pass what `TcpListener::local_addr` reported, not the
    /// configured port). A single address serves both `httpProxy` and
    /// `sslProxy` since this proxy handles CONNECT/MITM on the same
    /// listener rather than exposing separate ports.
    pub fn for_listener(addr: SocketAddr, options: &Options) -> Self {
        let address = addr.to_string();
        let no_proxy = if options.no_proxy.is_empty() {
            None
        } else {
            let mut hosts: Vec<String> = options.no_proxy.iter().cloned().collect();
            hosts.sort();
            Some(hosts)
        };
        Self {
            proxy: ProxyConfig {
                proxy_type: "manual",
                http_proxy: address.clone(),
                ssl_proxy: address,
                no_proxy,
            },
            accept_insecure_certs: true,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_the_exact_driver_shape() {
        let options = Options::default();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = DriverConfig::for_listener(addr, &options);
        let json = config.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"proxy":{"proxyType":"manual","httpProxy":"127.0.0.1:8080","sslProxy":"127.0.0.1:8080"},"acceptInsecureCerts":true}"#
        );
    }

    #[test]
    fn includes_no_proxy_when_configured() {
        let mut options = Options::default();
        options.no_proxy.insert("example.com".to_string());
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = DriverConfig::for_listener(addr, &options);
        assert_eq!(config.proxy.no_proxy, Some(vec!["example.com".to_string()]));
    }
}
