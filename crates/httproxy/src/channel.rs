//! The ask/tell controller channel: the single FIFO bus a connection
//! handler uses to hand flow events to addons and, for `ask`, block on a
//! possibly-mutated reply before continuing (spec §4.F).
//!
//! Grounded in the teacher's `mea`-based `GracefulShutdown` for the
//! condvar/mutex shape, generalized from a one-shot flag to a queue of
//! typed events.

use std::sync::Arc;

use mea::mutex::Mutex;
use smol::channel::{Sender, bounded, unbounded};

use std::net::SocketAddr;

use crate::flow::{HTTPFlow, TCPFlow, TCPMessage};

/// One event flowing from a connection handler to the addon chain. Names
/// follow the spec's hook vocabulary (§1, §4.F): `clientconnect`/
/// `clientdisconnect` bracket the whole accepted connection,
/// `http_connect` fires once a `CONNECT` is acknowledged, and the rest
/// mirror one HTTP or TCP flow's lifecycle.
pub enum Event {
    /// Asked, not told: an addon may veto the connection outright by
    /// replying `Reply::Kill` before the root layer ever runs (spec §4.H
    /// "asks the channel clientconnect (addons may replace or veto the
    /// root layer)").
    ClientConnect { peer: SocketAddr, reply: Sender<Reply<()>> },
    ClientDisconnect(SocketAddr),
    HttpConnect { host: String, port: u16 },
    HttpRequestHeaders(HTTPFlow),
    HttpRequest(HTTPFlow),
    HttpResponseHeaders(HTTPFlow),
    HttpResponse(HTTPFlow),
    HttpError(HTTPFlow),
    TcpStart(TCPFlow),
    TcpMessage { flow_id: u64, message: TCPMessage },
    TcpError { flow_id: u64, message: String },
    TcpEnd(TCPFlow),
    Log(LogEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// A reply to an `ask`: the (possibly addon-mutated) flow handed back, or
/// a signal to kill the connection outright.
pub enum Reply<T> {
    Continue(T),
    Kill,
}

/// The connection-local half of the channel: every layer holds one of
/// these and uses it to notify addons (`tell`) or notify-and-wait
/// (`ask`).
#[derive(Clone)]
pub struct Channel {
    tx: Sender<Event>,
    should_exit: Arc<Mutex<bool>>,
}

impl Channel {
    pub fn new(tx: Sender<Event>, should_exit: Arc<Mutex<bool>>) -> Self {
        Self { tx, should_exit }
    }

    /// Fire-and-forget notification; does not block the connection on
    /// addon processing.
    pub async fn tell(&self, event: Event) {
        let _ = self.tx.send(event).await;
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.tell(Event::Log(LogEntry { level, message: message.into() })).await;
    }

    pub async fn should_exit(&self) -> bool {
        *self.should_exit.lock().await
    }

    /// Synchronous `ask("clientconnect", ...)`: blocks the connection
    /// thread until the addon chain replies. No reply (channel dropped
    /// with no addon consuming it) is treated as `Continue`, matching an
    /// addon-less default chain that never vetoes a connection.
    pub async fn ask_client_connect(&self, peer: SocketAddr) -> Reply<()> {
        let ask = AskChannel::new();
        self.tell(Event::ClientConnect { peer, reply: ask.replier() }).await;
        ask.wait().await.unwrap_or(Reply::Continue(()))
    }
}

/// An `ask`-style round trip: send a request payload down `sender`, then
/// block on `receiver` for the single reply addons produce. Built as a
/// bounded(1) one-shot rendezvous rather than reusing the broadcast
/// `Event` queue, since only the originating layer cares about the reply.
pub struct AskChannel<T> {
    reply_tx: Sender<Reply<T>>,
    reply_rx: smol::channel::Receiver<Reply<T>>,
}

impl<T> AskChannel<T> {
    pub fn new() -> Self {
        let (reply_tx, reply_rx) = bounded(1);
        Self { reply_tx, reply_rx }
    }

    pub fn replier(&self) -> Sender<Reply<T>> {
        self.reply_tx.clone()
    }

    pub async fn wait(self) -> Option<Reply<T>> {
        self.reply_rx.recv().await.ok()
    }
}

impl<T> Default for AskChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the process-wide event bus addons subscribe to.
pub fn event_bus() -> (Sender<Event>, smol::channel::Receiver<Event>) {
    unbounded()
}
