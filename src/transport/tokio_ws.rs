//! Native WebSocket transport and timers on a tokio `LocalSet`.
//!
//! Everything here uses `spawn_local`, so the connection manager and its
//! callbacks stay on one thread, matching the browser's event loop.

use super::{Connector, PendingTimer, Scheduler, Transport, TransportEvents};
use anyhow::bail;
use futures::{SinkExt, StreamExt};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Opens WebSocket connections with tokio-tungstenite.
///
/// Must be used from inside a `tokio::task::LocalSet`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioConnector;

impl Connector for TokioConnector {
    fn open(&self, url: &str, events: TransportEvents) -> anyhow::Result<Box<dyn Transport>> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            bail!("unsupported WebSocket URL '{}'", url);
        }

        let url = url.to_string();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let opened = Rc::new(Cell::new(false));
        let task = tokio::task::spawn_local(run_socket(url, events, outbound_rx, opened.clone()));

        Ok(Box::new(TokioTransport {
            outbound: Some(outbound_tx),
            opened,
            task,
        }))
    }
}

async fn run_socket(
    url: String,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<String>,
    opened: Rc<Cell<bool>>,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            events.error(e.to_string());
            events.closed();
            return;
        }
    };

    opened.set(true);
    events.opened();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => events.frame(&text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => events.frame(text),
                    Err(_) => warn!(url = %url, len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(url = %url, frame = ?frame, "Server closed WebSocket");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    events.error(e.to_string());
                    break;
                }
                None => break,
            },

            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        events.error(e.to_string());
                        break;
                    }
                }
                None => {
                    // Client dropped the transport; close quietly
                    let _ = sink.close().await;
                    return;
                }
            },
        }
    }

    events.closed();
}

struct TokioTransport {
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Set by the socket task once the handshake has completed
    opened: Rc<Cell<bool>>,
    task: JoinHandle<()>,
}

impl Transport for TokioTransport {
    fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        match &self.outbound {
            Some(tx) => tx
                .send(text.to_string())
                .map_err(|_| anyhow::anyhow!("WebSocket task has exited")),
            None => bail!("transport is closed"),
        }
    }

    fn close(&mut self) {
        // An open socket sends a close frame once the sender is gone;
        // a handshake still in flight is abandoned
        self.outbound = None;
        if !self.opened.get() {
            debug!("Aborting WebSocket handshake");
            self.task.abort();
        }
    }
}

impl Drop for TokioTransport {
    fn drop(&mut self) {
        if self.outbound.is_some() || !self.opened.get() {
            self.task.abort();
        }
    }
}

/// Timers backed by `tokio::time::sleep` on the local task set
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Box<dyn PendingTimer> {
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Box::new(TokioTimer(handle))
    }
}

struct TokioTimer(JoinHandle<()>);

impl PendingTimer for TokioTimer {
    fn cancel(self: Box<Self>) {
        self.0.abort();
    }
}
