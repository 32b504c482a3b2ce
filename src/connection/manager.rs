use super::{ClientError, ConnectionState, ReconnectPolicy, SendOutcome};
use crate::bus::{BusEvent, EventBus};
use crate::event::{decode_frame, DecodedFrame, FrameKind};
use crate::transport::{
    Connector, PendingTimer, Scheduler, Transport, TransportEvents, TransportListener,
};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, warn};

/// Manages the lifecycle of one streaming connection.
///
/// Decodes inbound frames and publishes them on the [`EventBus`]; retries
/// dropped transports up to the policy's budget and then parks in `Failed`.
/// The manager exclusively owns its transport and its retry timer.
///
/// Created behind an `Rc` because transports and timers call back into it
/// through weak references.
pub struct ConnectionManager {
    bus: Rc<EventBus>,
    connector: Rc<dyn Connector>,
    scheduler: Rc<dyn Scheduler>,
    policy: ReconnectPolicy,
    link: RefCell<Link>,
    this: Weak<ConnectionManager>,
}

struct Link {
    state: ConnectionState,
    url: Option<String>,
    /// Consecutive transport failures since the last successful open
    attempts: u32,
    /// Bumped on every open attempt and on disconnect; callbacks carrying
    /// an older epoch are stale and ignored
    epoch: u64,
    /// `Connect` has been published for the current connection
    announced: bool,
    transport: Option<Box<dyn Transport>>,
    retry_timer: Option<Box<dyn PendingTimer>>,
}

impl ConnectionManager {
    pub fn new(
        bus: Rc<EventBus>,
        connector: Rc<dyn Connector>,
        scheduler: Rc<dyn Scheduler>,
        policy: ReconnectPolicy,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            bus,
            connector,
            scheduler,
            policy,
            link: RefCell::new(Link {
                state: ConnectionState::Disconnected,
                url: None,
                attempts: 0,
                epoch: 0,
                announced: false,
                transport: None,
                retry_timer: None,
            }),
            this: this.clone(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.link.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Consecutive failures counted against the retry budget
    pub fn attempts(&self) -> u32 {
        self.link.borrow().attempts
    }

    pub fn url(&self) -> Option<String> {
        self.link.borrow().url.clone()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.link.borrow().retry_timer.is_some()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start connecting to `url`.
    ///
    /// No-op while `Connecting` or `Connected`. From `Reconnecting` the
    /// pending retry is cancelled and the attempt happens now. From
    /// `Disconnected` or `Failed` the retry budget starts over.
    pub fn connect(&self, url: &str) {
        let (from, pending_retry) = {
            let mut link = self.link.borrow_mut();
            match link.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(url = %url, state = %link.state, "Connect ignored, connection already active");
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::Failed => link.attempts = 0,
                ConnectionState::Reconnecting => {}
            }

            link.url = Some(url.to_string());
            let from = link.state;
            link.state = ConnectionState::Connecting;
            (from, link.retry_timer.take())
        };

        if let Some(timer) = pending_retry {
            timer.cancel();
        }

        info!(url = %url, "Connecting");
        self.publish_transition(from, ConnectionState::Connecting);
        self.open_transport();
    }

    /// Explicit teardown: close the transport, cancel any pending retry,
    /// and land in `Disconnected`. Calling it again has no effect.
    pub fn disconnect(&self) {
        let (from, announced, transport, pending_retry) = {
            let mut link = self.link.borrow_mut();
            if link.state == ConnectionState::Disconnected {
                debug!("Disconnect ignored, already disconnected");
                return;
            }

            link.epoch += 1;
            link.attempts = 0;
            let from = link.state;
            link.state = ConnectionState::Disconnected;
            let announced = std::mem::take(&mut link.announced);
            (from, announced, link.transport.take(), link.retry_timer.take())
        };

        if let Some(timer) = pending_retry {
            timer.cancel();
        }
        if let Some(mut transport) = transport {
            transport.close();
        }

        info!(from = %from, "Disconnected");
        self.publish_transition(from, ConnectionState::Disconnected);
        if from == ConnectionState::Connected && announced {
            self.bus.publish(BusEvent::Disconnect);
        }
    }

    /// JSON-encode `payload` and send it if connected.
    ///
    /// Best effort: nothing is queued, and a drop is only logged.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> SendOutcome {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Dropping outbound message that could not be encoded");
                return SendOutcome::Dropped;
            }
        };

        let mut link = self.link.borrow_mut();
        if link.state != ConnectionState::Connected {
            warn!(state = %link.state, "Not connected, dropping outbound message");
            return SendOutcome::Dropped;
        }

        match link.transport.as_mut().map(|t| t.send_text(&text)) {
            Some(Ok(())) => SendOutcome::Sent,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to write outbound message");
                SendOutcome::Dropped
            }
            None => SendOutcome::Dropped,
        }
    }

    fn open_transport(&self) {
        let (url, epoch) = {
            let mut link = self.link.borrow_mut();
            if link.state != ConnectionState::Connecting {
                return;
            }
            link.epoch += 1;
            (link.url.clone().unwrap_or_default(), link.epoch)
        };

        let listener: Weak<dyn TransportListener> = self.this.clone();
        match self.connector.open(&url, TransportEvents::new(listener, epoch)) {
            Ok(transport) => {
                let unwanted = {
                    let mut link = self.link.borrow_mut();
                    if link.epoch == epoch && link.state == ConnectionState::Connecting {
                        link.transport = Some(transport);
                        None
                    } else {
                        Some(transport)
                    }
                };
                if let Some(mut transport) = unwanted {
                    transport.close();
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to open transport");
                self.bus
                    .publish(BusEvent::Error(ClientError::Transport(e.to_string())));
                self.handle_failure(epoch);
            }
        }
    }

    /// A transport of the current epoch failed: count it and either
    /// schedule a retry or give up.
    fn handle_failure(&self, epoch: u64) {
        let (from, announced, attempt) = {
            let mut link = self.link.borrow_mut();
            if link.epoch != epoch {
                debug!(epoch = epoch, "Ignoring close from stale transport");
                return;
            }
            if !matches!(
                link.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return;
            }

            link.transport = None;
            link.attempts += 1;
            let from = link.state;
            link.state = ConnectionState::Reconnecting;
            let announced = std::mem::take(&mut link.announced);
            (from, announced, link.attempts)
        };

        if from == ConnectionState::Connected {
            warn!("Connection lost");
        }
        self.publish_transition(from, ConnectionState::Reconnecting);
        if from == ConnectionState::Connected && announced {
            self.bus.publish(BusEvent::Disconnect);
        }

        if attempt >= self.policy.max_attempts {
            let gave_up = {
                let mut link = self.link.borrow_mut();
                let current = link.epoch == epoch && link.state == ConnectionState::Reconnecting;
                if current {
                    link.state = ConnectionState::Failed;
                }
                current
            };
            if gave_up {
                error!(
                    attempts = attempt,
                    max_attempts = self.policy.max_attempts,
                    "Max reconnection attempts reached"
                );
                self.publish_transition(ConnectionState::Reconnecting, ConnectionState::Failed);
            }
            return;
        }

        self.schedule_retry(epoch, attempt);
    }

    fn schedule_retry(&self, epoch: u64, attempt: u32) {
        let delay = self.policy.delay_for(attempt);
        let this = self.this.clone();
        let timer = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(manager) = this.upgrade() {
                    manager.on_retry_timer(epoch);
                }
            }),
        );

        let unwanted = {
            let mut link = self.link.borrow_mut();
            if link.epoch == epoch && link.state == ConnectionState::Reconnecting {
                link.retry_timer = Some(timer);
                None
            } else {
                Some(timer)
            }
        };

        match unwanted {
            Some(timer) => timer.cancel(),
            None => warn!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempting to reconnect"
            ),
        }
    }

    fn on_retry_timer(&self, epoch: u64) {
        {
            let mut link = self.link.borrow_mut();
            if link.epoch != epoch || link.state != ConnectionState::Reconnecting {
                debug!(epoch = epoch, "Ignoring stale retry timer");
                return;
            }
            link.retry_timer = None;
            link.state = ConnectionState::Connecting;
        }

        self.publish_transition(ConnectionState::Reconnecting, ConnectionState::Connecting);
        self.open_transport();
    }

    fn is_current(&self, epoch: u64, state: ConnectionState) -> bool {
        let link = self.link.borrow();
        link.epoch == epoch && link.state == state
    }

    fn publish_transition(&self, from: ConnectionState, to: ConnectionState) {
        if from != to {
            self.bus.publish(BusEvent::StateChanged { from, to });
        }
    }
}

impl TransportListener for ConnectionManager {
    fn on_open(&self, epoch: u64) {
        let url = {
            let mut link = self.link.borrow_mut();
            if link.epoch != epoch || link.state != ConnectionState::Connecting {
                debug!(epoch = epoch, "Ignoring open from stale transport");
                return;
            }
            link.state = ConnectionState::Connected;
            link.attempts = 0;
            link.url.clone().unwrap_or_default()
        };

        info!(url = %url, "Connected");
        self.publish_transition(ConnectionState::Connecting, ConnectionState::Connected);

        // A transition handler may already have torn the connection down;
        // `Disconnect` is only published for a connection that was announced
        let announce = {
            let mut link = self.link.borrow_mut();
            let current = link.epoch == epoch && link.state == ConnectionState::Connected;
            if current {
                link.announced = true;
            }
            current
        };
        if announce {
            self.bus.publish(BusEvent::Connect);
        }
    }

    fn on_frame(&self, epoch: u64, text: &str) {
        if !self.is_current(epoch, ConnectionState::Connected) {
            debug!(epoch = epoch, "Ignoring frame from stale transport");
            return;
        }

        let DecodedFrame { envelope, kind } = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Discarding undecodable frame");
                return;
            }
        };

        self.bus.publish(BusEvent::Message(envelope));
        match kind {
            FrameKind::Emotion(event) => {
                self.bus.publish(BusEvent::Emotion(event));
            }
            FrameKind::ServerError(data) => {
                warn!(data = %data, "Server reported an error");
                self.bus.publish(BusEvent::Error(ClientError::Server(data)));
            }
            FrameKind::Other => {}
        }
    }

    fn on_error(&self, epoch: u64, message: String) {
        if self.link.borrow().epoch != epoch {
            debug!(epoch = epoch, "Ignoring error from stale transport");
            return;
        }

        warn!(error = %message, "Transport error");
        self.bus
            .publish(BusEvent::Error(ClientError::Transport(message)));
    }

    fn on_close(&self, epoch: u64) {
        self.handle_failure(epoch);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let link = self.link.get_mut();
        if let Some(timer) = link.retry_timer.take() {
            timer.cancel();
        }
        if let Some(mut transport) = link.transport.take() {
            transport.close();
        }
    }
}
