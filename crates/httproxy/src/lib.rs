//! Intercepting HTTP(S)/TCP proxy core (spec §1): the per-connection
//! layer stack a browser-automation library embeds, spawns on a local
//! address, and inspects traffic through via the controller channel.
//!
//! The public surface mirrors the teacher's `pub async fn run()` entry
//! point (`crates/httproxy/src/lib.rs` in the teacher repo) for the
//! standalone binary, plus a library API (`Options`, `ProxyServer`,
//! `Channel`) for embedding directly rather than shelling out to a CLI.

pub mod addons;
pub mod ca;
pub mod channel;
pub mod connection;
pub mod driver;
pub mod error;
pub mod flow;
pub mod headers;
pub mod http1;
mod init;
pub mod io;
pub mod layers;
pub mod message;
pub mod options;
pub mod serverspec;
pub mod server;

pub use channel::{Channel, Event};
pub use driver::DriverConfig;
pub use error::{ProxyError, Result};
pub use init::shutdown::GracefulShutdown as Shutdown;
pub use options::Options;
pub use server::ProxyServer;

/// Runs the standalone proxy: parses CLI flags into [`Options`], installs
/// the logger, starts the default addon chain, and serves until `Ctrl+C`
/// triggers the graceful shutdown (spec §5 "Cancellation").
pub async fn run() -> anyhow::Result<()> {
    let shutdown = init::shutdown::init()?;
    let options = init::cmd::init()?;

    let (event_tx, event_rx) = channel::event_bus();
    smol::spawn(addons::run_default_chain(event_rx)).detach();

    let server = ProxyServer::new(options, event_tx)?;
    server.run(shutdown).await?;
    log::info!("Shutdown complete.");
    Ok(())
}
