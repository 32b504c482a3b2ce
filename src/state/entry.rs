use crate::event::EmotionEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Identity used for deduplication: latitude, longitude and emotion label.
///
/// Rendered as `"<lat>,<lng>,<emotion>"` using the shortest round-trip form
/// of each coordinate, so equal inputs always yield equal keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryKey(String);

impl EntryKey {
    pub fn of(event: &EmotionEvent) -> Self {
        EntryKey(format!(
            "{},{},{}",
            normalize(event.latitude),
            normalize(event.longitude),
            event.emotion
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// -0.0 and 0.0 name the same place
fn normalize(coordinate: f64) -> f64 {
    if coordinate == 0.0 {
        0.0
    } else {
        coordinate
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest event stored for one key
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoreEntry {
    pub key: EntryKey,
    pub event: EmotionEvent,
    /// Assigned by the client when the event was merged
    pub received_at: DateTime<Utc>,
}

/// Immutable, cheaply cloneable list of entries, least recently touched first
#[derive(Clone, Debug)]
pub struct Snapshot(Rc<[StoreEntry]>);

impl Snapshot {
    pub(crate) fn new(entries: Vec<StoreEntry>) -> Self {
        Snapshot(entries.into())
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.0
    }

    /// Whether both snapshots share the same underlying buffer
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Snapshot {
    type Target = [StoreEntry];

    fn deref(&self) -> &[StoreEntry] {
        &self.0
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::new(Vec::new())
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.entries() == other.entries()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a StoreEntry;
    type IntoIter = std::slice::Iter<'a, StoreEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
