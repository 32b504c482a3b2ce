//! In-memory transport and simulated clock.
//!
//! Used by the test suites to drive the connection manager deterministically:
//! the test decides when a transport opens, what frames arrive, when it drops,
//! and how far simulated time advances.

use super::{Connector, PendingTimer, Scheduler, Transport, TransportEvents};
use anyhow::bail;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

// ─── Scheduler ──────────────────────────────────────────────────────────────

type Task = Box<dyn FnOnce()>;

#[derive(Default)]
struct Timeline {
    now: Duration,
    next_id: u64,
    /// Keyed by (deadline, id) so equal deadlines fire in scheduling order
    tasks: BTreeMap<(Duration, u64), Task>,
}

/// Scheduler driven by [`ManualScheduler::advance`] instead of wall time
#[derive(Clone, Default)]
pub struct ManualScheduler {
    timeline: Rc<RefCell<Timeline>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated time elapsed since creation
    pub fn now(&self) -> Duration {
        self.timeline.borrow().now
    }

    /// Number of tasks scheduled and not yet run or cancelled
    pub fn pending(&self) -> usize {
        self.timeline.borrow().tasks.len()
    }

    /// Delay until the earliest pending task, if any
    pub fn next_deadline(&self) -> Option<Duration> {
        let timeline = self.timeline.borrow();
        timeline
            .tasks
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_sub(timeline.now))
    }

    /// Move time forward, running due tasks in deadline order.
    ///
    /// Tasks scheduled by a running task are eligible in the same call if
    /// their deadline falls inside the window. Returns the number run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;

        loop {
            let task = {
                let mut timeline = self.timeline.borrow_mut();
                let due = match timeline.tasks.keys().next() {
                    Some(&(deadline, id)) if deadline <= target => (deadline, id),
                    _ => break,
                };
                timeline.now = due.0;
                timeline.tasks.remove(&due)
            };

            if let Some(task) = task {
                task();
                ran += 1;
            }
        }

        self.timeline.borrow_mut().now = target;
        ran
    }

    /// Wall clock anchored at `epoch` that follows simulated time
    pub fn clock(&self, epoch: DateTime<Utc>) -> impl Fn() -> DateTime<Utc> + 'static {
        let timeline = Rc::downgrade(&self.timeline);
        move || {
            let elapsed = timeline
                .upgrade()
                .map(|t| t.borrow().now)
                .unwrap_or_default();
            epoch + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Box<dyn PendingTimer> {
        let mut timeline = self.timeline.borrow_mut();
        let key = (timeline.now + delay, timeline.next_id);
        timeline.next_id += 1;
        timeline.tasks.insert(key, task);

        Box::new(ManualTimer {
            timeline: Rc::downgrade(&self.timeline),
            key,
        })
    }
}

struct ManualTimer {
    timeline: Weak<RefCell<Timeline>>,
    key: (Duration, u64),
}

impl PendingTimer for ManualTimer {
    fn cancel(self: Box<Self>) {
        if let Some(timeline) = self.timeline.upgrade() {
            timeline.borrow_mut().tasks.remove(&self.key);
        }
    }
}

// ─── Connector ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct LinkState {
    url: String,
    sent: Vec<String>,
    closed_by_client: bool,
    dropped: bool,
}

/// Server side of one in-memory transport.
///
/// The test plays the server: `accept` opens it, `deliver` pushes frames,
/// `drop_connection` simulates the server or network going away.
#[derive(Clone)]
pub struct MemoryLink {
    state: Rc<RefCell<LinkState>>,
    events: TransportEvents,
}

impl MemoryLink {
    pub fn url(&self) -> String {
        self.state.borrow().url.clone()
    }

    pub fn accept(&self) {
        self.events.opened();
    }

    pub fn deliver(&self, text: &str) {
        self.events.frame(text);
    }

    pub fn fail(&self, message: &str) {
        self.events.error(message);
    }

    /// Abrupt close from the remote side
    pub fn drop_connection(&self) {
        self.state.borrow_mut().dropped = true;
        self.events.closed();
    }

    /// Connection refused: error followed by close, as browsers report it
    pub fn refuse(&self) {
        self.events.error("connection refused");
        self.drop_connection();
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.state.borrow().closed_by_client
    }
}

struct MemoryTransport {
    state: Rc<RefCell<LinkState>>,
}

impl Transport for MemoryTransport {
    fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.closed_by_client || state.dropped {
            bail!("transport to {} is closed", state.url);
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed_by_client = true;
    }
}

/// Connector that records every open attempt as a [`MemoryLink`]
#[derive(Clone, Default)]
pub struct MemoryConnector {
    links: Rc<RefCell<Vec<MemoryLink>>>,
    reject_opens: Rc<Cell<bool>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` itself fail (e.g. malformed URL) until switched off
    pub fn reject_opens(&self, reject: bool) {
        self.reject_opens.set(reject);
    }

    /// Number of transports opened so far
    pub fn attempts(&self) -> usize {
        self.links.borrow().len()
    }

    pub fn link(&self, index: usize) -> Option<MemoryLink> {
        self.links.borrow().get(index).cloned()
    }

    pub fn last(&self) -> Option<MemoryLink> {
        self.links.borrow().last().cloned()
    }
}

impl Connector for MemoryConnector {
    fn open(&self, url: &str, events: TransportEvents) -> anyhow::Result<Box<dyn Transport>> {
        if self.reject_opens.get() {
            bail!("cannot open transport to {}", url);
        }

        let state = Rc::new(RefCell::new(LinkState {
            url: url.to_string(),
            ..LinkState::default()
        }));
        self.links.borrow_mut().push(MemoryLink {
            state: state.clone(),
            events,
        });

        Ok(Box::new(MemoryTransport { state }))
    }
}
