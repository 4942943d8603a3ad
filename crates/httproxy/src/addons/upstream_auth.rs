//! The `upstream_auth` addon: injects `Proxy-Authorization` on requests
//! traversing an HTTP upstream proxy, skipping any host listed in
//! `no_proxy` (spec §4.I, §4.C). The actual header-writing lives on the
//! wire-rewrite path in [`crate::layers::upstream_http`] since that's
//! where the absolute-form rewrite also happens; this module is the
//! addon-facing decision of *whether* a given host gets the header,
//! exposed separately so it can be asserted on its own.
//!
//! An original decision function, listed as one of the always-on
//! defaults the way `addons/__init__.py`'s `default_addons()` lists its
//! own.

use crate::options::Options;

/// Whether `host` should receive the upstream `Proxy-Authorization`
/// header: only when the proxy has an upstream configured and the host
/// isn't excluded via `no_proxy`.
pub fn applies_to(host: &str, options: &Options) -> bool {
    if options.upstream_auth.is_none() && options.upstream_custom_auth.is_none() {
        return false;
    }
    !crate::layers::upstream_http::bypasses_upstream(host, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with_auth() -> Options {
        let mut o = Options::default();
        o.upstream_auth = Some("u:pw".to_string());
        o
    }

    #[test]
    fn applies_when_auth_configured_and_host_not_excluded() {
        let options = options_with_auth();
        assert!(applies_to("example.com", &options));
    }

    #[test]
    fn skips_hosts_in_no_proxy() {
        let mut options = options_with_auth();
        options.no_proxy.insert("example.com".to_string());
        assert!(!applies_to("example.com", &options));
    }

    #[test]
    fn does_nothing_without_configured_auth() {
        let options = Options::default();
        assert!(!applies_to("example.com", &options));
    }
}
