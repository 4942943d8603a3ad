//! Default addon behaviors (spec §4.I): `core`, `streambodies`, and
//! `upstream_auth`. Unlike a scripting/plugin addon chain with arbitrary
//! third-party hooks (explicitly out of scope, §1), these three are the
//! fixed, always-on behaviors the proxy itself depends on to decide how a
//! flow is shaped before and after it reaches the channel.
//!
//! Original decision-function designs: `core`, `streambodies`, and
//! `upstream_auth` are split the way `addons/__init__.py`'s
//! `default_addons()` groups a default installation's always-on behaviors,
//! but each is a pure function here rather than an object with lifecycle
//! hooks, since this crate has no addon registry to dispatch through (§1
//! "out of scope").

pub mod core;
pub mod streambodies;
pub mod upstream_auth;

use crate::channel::{Channel, Event, LogLevel, Reply};

/// Consumes the event bus and applies whichever default addon behavior
/// reacts to each event, for as long as the channel stays open. Run as a
/// background task for the lifetime of the server; this is the
/// process-wide "addon chain" a real deployment would otherwise register
/// with an addon manager.
pub async fn run_default_chain(rx: smol::channel::Receiver<Event>) {
    while let Ok(event) = rx.recv().await {
        match event {
            Event::ClientConnect { peer, reply } => {
                log::debug!("peer={peer} clientconnect");
                let _ = reply.send(Reply::Continue(())).await;
            }
            Event::HttpResponse(flow) => {
                if let Some(err) = &flow.error {
                    log::warn!("flow {} finished with error: {}", flow.id, err.message);
                }
            }
            Event::TcpEnd(flow) => {
                if let Some(err) = &flow.error {
                    log::warn!("tcp flow {} finished with error: {}", flow.id, err.message);
                }
            }
            Event::Log(entry) => log_entry(&entry),
            _ => {}
        }
    }
}

fn log_entry(entry: &crate::channel::LogEntry) {
    match entry.level {
        LogLevel::Debug => log::debug!("{}", entry.message),
        LogLevel::Info => log::info!("{}", entry.message),
        LogLevel::Warn => log::warn!("{}", entry.message),
        LogLevel::Error => log::error!("{}", entry.message),
    }
}

/// Convenience used by layers that only need to fire a log event without
/// holding a reference to the full channel type.
pub async fn tell_log(channel: &Channel, level: LogLevel, message: impl Into<String>) {
    channel.log(level, message).await;
}
