use super::entry::{EntryKey, Snapshot, StoreEntry};
use super::StoreConfig;
use crate::bus::{BusEvent, EventBus, Listeners, SubscriptionId, Topic};
use crate::event::EmotionEvent;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, info};

/// Source of `received_at` timestamps
pub type Clock = Rc<dyn Fn() -> DateTime<Utc>>;

/// Whether an ingest created a new entry or replaced an existing one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Replaced,
}

/// StateStore keeps at most one entry per [`EntryKey`], last write wins.
///
/// Entries are ordered by when they were last touched, oldest first; each
/// ingest moves its key to the end. Readers get an immutable [`Snapshot`],
/// never a reference into the store.
pub struct StateStore {
    config: StoreConfig,
    clock: Clock,
    entries: RefCell<Entries>,
    listeners: Listeners<Snapshot>,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<EntryKey, Slot>,
    /// Touch sequence -> key, oldest first
    order: BTreeMap<u64, EntryKey>,
    next_seq: u64,
    /// Rebuilt lazily after a mutation
    cached: Option<Snapshot>,
}

struct Slot {
    entry: StoreEntry,
    seq: u64,
}

impl Entries {
    fn remove_oldest(&mut self) -> Option<StoreEntry> {
        let (_, key) = self.order.pop_first()?;
        self.by_key.remove(&key).map(|slot| slot.entry)
    }

    fn snapshot(&mut self) -> Snapshot {
        if let Some(snapshot) = &self.cached {
            return snapshot.clone();
        }

        let entries = self
            .order
            .values()
            .filter_map(|key| self.by_key.get(key))
            .map(|slot| slot.entry.clone())
            .collect();
        let snapshot = Snapshot::new(entries);
        self.cached = Some(snapshot.clone());
        snapshot
    }
}

impl StateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Rc::new(Utc::now))
    }

    pub fn with_clock(config: StoreConfig, clock: Clock) -> Self {
        Self {
            config,
            clock,
            entries: RefCell::new(Entries::default()),
            listeners: Listeners::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe this store to emotion events on `bus`.
    ///
    /// The subscription holds a weak reference; dropping the store makes it inert.
    pub fn attach(self: &Rc<Self>, bus: &EventBus) -> SubscriptionId {
        let store = Rc::downgrade(self);
        bus.subscribe(Topic::Emotion, move |event| {
            if let (Some(store), BusEvent::Emotion(emotion)) = (store.upgrade(), event) {
                store.ingest(emotion.clone());
            }
            Ok(())
        })
    }

    /// Merge one event, replacing any entry with the same key, then notify listeners.
    pub fn ingest(&self, event: EmotionEvent) -> IngestOutcome {
        let now = (self.clock)();
        let key = EntryKey::of(&event);

        let (outcome, evicted, snapshot) = {
            let mut entries = self.entries.borrow_mut();
            let mut evicted = self.expire_locked(&mut entries, now);

            let seq = entries.next_seq;
            entries.next_seq += 1;

            let entry = StoreEntry {
                key: key.clone(),
                event,
                received_at: now,
            };

            let outcome = match entries.by_key.insert(key.clone(), Slot { entry, seq }) {
                Some(previous) => {
                    entries.order.remove(&previous.seq);
                    IngestOutcome::Replaced
                }
                None => IngestOutcome::Inserted,
            };
            entries.order.insert(seq, key.clone());

            if let Some(max) = self.config.max_entries {
                while entries.by_key.len() > max {
                    if entries.remove_oldest().is_none() {
                        break;
                    }
                    evicted += 1;
                }
            }

            entries.cached = None;
            let snapshot = if self.listeners.is_empty() {
                None
            } else {
                Some(entries.snapshot())
            };
            (outcome, evicted, snapshot)
        };

        debug!(key = %key, outcome = ?outcome, evicted = evicted, "Ingested emotion event");
        if let Some(snapshot) = snapshot {
            self.listeners.dispatch("store_change", &snapshot);
        }
        outcome
    }

    /// Current entries, least recently touched first. O(n) after a change, O(1) otherwise.
    pub fn snapshot(&self) -> Snapshot {
        self.entries.borrow_mut().snapshot()
    }

    pub fn get(&self, key: &EntryKey) -> Option<StoreEntry> {
        self.entries
            .borrow()
            .by_key
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries older than the configured ttl. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = (self.clock)();
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let removed = self.expire_locked(&mut entries, now);
            if removed > 0 {
                entries.cached = None;
            }
            removed
        };

        if removed > 0 {
            info!(removed = removed, "Pruned expired entries");
            self.notify();
        }
        removed
    }

    /// Drop every entry and notify listeners
    pub fn clear(&self) {
        {
            let mut entries = self.entries.borrow_mut();
            entries.by_key.clear();
            entries.order.clear();
            entries.cached = None;
        }
        self.notify();
    }

    /// Register a handler called with the new snapshot after every change
    pub fn on_change<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Snapshot) -> anyhow::Result<()> + 'static,
    {
        self.listeners.add(handler)
    }

    /// Remove a change handler; unknown ids are ignored
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }

    fn notify(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.listeners.dispatch("store_change", &snapshot);
    }

    /// Touch order follows clock order, so expired entries form a prefix of `order`.
    fn expire_locked(&self, entries: &mut Entries, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.config.ttl() else {
            return 0;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = now - ttl;

        let mut removed = 0;
        while let Some((_, key)) = entries.order.first_key_value() {
            let expired = entries
                .by_key
                .get(key)
                .map_or(true, |slot| slot.entry.received_at < cutoff);
            if !expired {
                break;
            }
            entries.remove_oldest();
            removed += 1;
        }
        removed
    }
}
