// Deduplicated, ordered view of the emotion stream

mod config;
mod entry;
mod store;

pub use config::StoreConfig;
pub use entry::{EntryKey, Snapshot, StoreEntry};
pub use store::{Clock, IngestOutcome, StateStore};

#[cfg(test)]
mod tests;
