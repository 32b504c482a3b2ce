// Transport and timer seams consumed by the connection manager

pub mod memory;
#[cfg(not(target_arch = "wasm32"))]
pub mod tokio_ws;

use std::rc::Weak;
use std::time::Duration;

/// An open (or opening) message-framed connection.
///
/// Implementations must not report events synchronously from inside
/// `send_text` or `close`; events are delivered on a later turn of the
/// event loop through [`TransportEvents`].
pub trait Transport {
    fn send_text(&mut self, text: &str) -> anyhow::Result<()>;

    /// Client-initiated close. No close event is expected afterwards.
    fn close(&mut self);
}

/// Opens transports. `open` returns immediately; the outcome arrives
/// later as `opened` or `closed` on the provided sink.
pub trait Connector {
    fn open(&self, url: &str, events: TransportEvents) -> anyhow::Result<Box<dyn Transport>>;
}

/// Schedules one-shot deferred work on the event loop
pub trait Scheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Box<dyn PendingTimer>;
}

/// Handle to a scheduled task
pub trait PendingTimer {
    /// Prevent the task from running. Cancelling a task that already ran is a no-op.
    fn cancel(self: Box<Self>);
}

/// Receives transport events, tagged with the connection epoch they belong to
pub trait TransportListener {
    fn on_open(&self, epoch: u64);
    fn on_frame(&self, epoch: u64, text: &str);
    fn on_error(&self, epoch: u64, message: String);
    fn on_close(&self, epoch: u64);
}

/// Event sink handed to a [`Connector`] for one transport.
///
/// Holds only a weak reference, so a transport outliving its manager
/// reports into the void instead of keeping the manager alive.
#[derive(Clone)]
pub struct TransportEvents {
    listener: Weak<dyn TransportListener>,
    epoch: u64,
}

impl TransportEvents {
    pub fn new(listener: Weak<dyn TransportListener>, epoch: u64) -> Self {
        Self { listener, epoch }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn opened(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_open(self.epoch);
        }
    }

    pub fn frame(&self, text: &str) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_frame(self.epoch, text);
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_error(self.epoch, message.into());
        }
    }

    pub fn closed(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_close(self.epoch);
        }
    }
}
