//! The per-connection layer stack (spec §4.B/§4.C): a connection starts in
//! `rawtcp`, and on a CONNECT request either stays raw (opaque tunnel),
//! hands off to `tls` for MITM, or dials an upstream via `upstream_http`/
//! `upstream_socks` before any of that. `http_forward` drives the HTTP/1
//! request/response loop once the target is known to speak HTTP and owns
//! the handoff between layers directly, threading `Transport`s through
//! rather than a shared context struct (see DESIGN.md).

pub mod http_forward;
pub mod rawtcp;
pub mod tls;
pub mod transparent;
pub mod upstream_http;
pub mod upstream_socks;
