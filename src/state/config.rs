use serde::Deserialize;
use std::time::Duration;

/// Retention limits for the state store.
///
/// Both limits are off by default: every distinct key is kept for the
/// life of the session.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StoreConfig {
    /// Evict least recently touched entries beyond this count
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Drop entries not touched for this many seconds
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl StoreConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}
