use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned by every subscribe call; unique for the life of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub type Handler<T> = Rc<dyn Fn(&T) -> anyhow::Result<()>>;

/// Ordered handler list with per-handler fault isolation.
///
/// Dispatch works on a copy of the list taken when it starts, so handlers
/// may add or remove handlers (or dispatch again) while being called.
/// A handler removed mid-dispatch is not called afterwards; one added
/// mid-dispatch first sees the next dispatch.
///
/// Panics are only contained where they unwind. On `wasm32-unknown-unknown`
/// a panic aborts the module, so in the browser only `Err` returns are
/// isolated; handlers there should report faults through `Err`.
pub struct Listeners<T> {
    entries: RefCell<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) -> anyhow::Result<()> + 'static,
    {
        let id = SubscriptionId::next();
        self.entries.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.borrow().iter().any(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Call every handler with `value`; returns how many completed cleanly.
    pub fn dispatch(&self, topic: &str, value: &T) -> usize {
        let current: Vec<(SubscriptionId, Handler<T>)> = self
            .entries
            .borrow()
            .iter()
            .map(|(id, handler)| (*id, Rc::clone(handler)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in current {
            if !self.contains(id) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| handler(value))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(topic = %topic, subscription = %id, error = %e, "Event handler failed");
                }
                Err(payload) => {
                    error!(
                        topic = %topic,
                        subscription = %id,
                        panic = %panic_message(payload.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
