//! Transparent mode: the proxy sits in the network path without the
//! client knowing, so the real destination has to be recovered from
//! platform-specific redirect state (Linux `SO_ORIGINAL_DST`, pf on BSD)
//! rather than a CONNECT request or absolute-form URL.
//!
//! Out of scope for this crate (see Non-goals): this module is the
//! extension point a platform integration would implement, returning the
//! original destination for an accepted socket before handing it to the
//! same `http_forward`/`rawtcp` layers regular mode uses.

use std::net::SocketAddr;

use crate::error::{ProxyError, Result};

/// Recovers the original destination address for a transparently
/// redirected connection. No platform backend is implemented; callers
/// configuring `Mode::Transparent` get a clear startup-time error instead
/// of a proxy that silently misbehaves.
pub fn original_destination(_peer: SocketAddr) -> Result<SocketAddr> {
    Err(ProxyError::Server(
        "transparent mode requires a platform-specific original-destination backend, none is configured".into(),
    ))
}
