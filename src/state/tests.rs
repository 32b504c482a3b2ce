use super::*;
use crate::bus::{BusEvent, EventBus};
use crate::event::EmotionEvent;
use chrono::{DateTime, Duration, Utc};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Store whose clock is advanced by hand, one second per tick
fn store_with_clock(config: StoreConfig) -> (StateStore, Rc<Cell<i64>>) {
    let seconds = Rc::new(Cell::new(0));
    let s = seconds.clone();
    let store = StateStore::with_clock(config, Rc::new(move || epoch() + Duration::seconds(s.get())));
    (store, seconds)
}

fn event(lat: f64, lng: f64, emotion: &str, intensity: f64) -> EmotionEvent {
    EmotionEvent::new(lat, lng, emotion, intensity)
}

#[test]
fn test_duplicate_key_keeps_last_event() {
    let store = StateStore::new(StoreConfig::default());

    assert_eq!(store.ingest(event(10.0, 20.0, "happy", 0.2)), IngestOutcome::Inserted);
    assert_eq!(store.ingest(event(10.0, 20.0, "happy", 0.9)), IngestOutcome::Replaced);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event.intensity, 0.9);
}

#[test]
fn test_replacement_is_wholesale() {
    let store = StateStore::new(StoreConfig::default());

    let mut first = event(1.0, 2.0, "sad", 0.3);
    first.city = Some("Lima".to_string());
    first.text = Some("rainy again".to_string());
    store.ingest(first);

    store.ingest(event(1.0, 2.0, "sad", 0.6));

    let entry = store.get(&EntryKey::of(&event(1.0, 2.0, "sad", 0.0))).unwrap();
    assert_eq!(entry.event.city, None);
    assert_eq!(entry.event.text, None);
    assert_eq!(entry.event.intensity, 0.6);
}

#[test]
fn test_distinct_keys_each_kept_once() {
    let store = StateStore::new(StoreConfig::default());

    let history = [
        event(10.0, 20.0, "happy", 0.1),
        event(10.0, 20.0, "sad", 0.2),
        event(10.0, 21.0, "happy", 0.3),
        event(10.0, 20.0, "happy", 0.4),
        event(10.0, 21.0, "happy", 0.5),
        event(-5.0, 20.0, "angry", 0.6),
    ];
    for e in history.iter().cloned() {
        store.ingest(e);
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 4);

    // Most recently touched last; each key holds its last event
    let summary: Vec<(&str, f64)> = snapshot
        .iter()
        .map(|entry| (entry.key.as_str(), entry.event.intensity))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("10,20,sad", 0.2),
            ("10,20,happy", 0.4),
            ("10,21,happy", 0.5),
            ("-5,20,angry", 0.6),
        ]
    );
}

#[test]
fn test_snapshot_order_is_stable_across_reads() {
    let store = StateStore::new(StoreConfig::default());
    for i in 0..50 {
        store.ingest(event(i as f64, -(i as f64), "neutral", 0.5));
    }

    let first = store.snapshot();
    let second = store.snapshot();
    assert_eq!(first, second);
    assert!(first.ptr_eq(&second));
}

#[test]
fn test_snapshot_is_detached_from_store() {
    let store = StateStore::new(StoreConfig::default());
    store.ingest(event(1.0, 1.0, "happy", 0.5));

    let before = store.snapshot();
    store.ingest(event(1.0, 1.0, "happy", 1.0));
    store.ingest(event(2.0, 2.0, "happy", 1.0));

    assert_eq!(before.len(), 1);
    assert_eq!(before[0].event.intensity, 0.5);
    assert_eq!(store.snapshot().len(), 2);
}

#[test]
fn test_received_at_assigned_at_merge() {
    let (store, seconds) = store_with_clock(StoreConfig::default());

    store.ingest(event(3.0, 4.0, "surprised", 0.5));
    seconds.set(30);
    store.ingest(event(3.0, 4.0, "surprised", 0.7));

    let snapshot = store.snapshot();
    assert_eq!(snapshot[0].received_at, epoch() + Duration::seconds(30));
}

#[test]
fn test_key_rendering() {
    assert_eq!(EntryKey::of(&event(10.5, -84.25, "happy", 0.0)).as_str(), "10.5,-84.25,happy");
    assert_eq!(EntryKey::of(&event(-0.0, 0.0, "sad", 0.0)), EntryKey::of(&event(0.0, 0.0, "sad", 0.0)));
    // Label is part of the identity exactly as received
    assert_ne!(
        EntryKey::of(&event(1.0, 1.0, "Happy", 0.0)),
        EntryKey::of(&event(1.0, 1.0, "happy", 0.0))
    );
}

#[test]
fn test_change_listeners_receive_new_snapshot() {
    let store = StateStore::new(StoreConfig::default());
    let sizes = Rc::new(RefCell::new(Vec::new()));

    let s = sizes.clone();
    let id = store.on_change(move |snapshot| {
        s.borrow_mut().push(snapshot.len());
        Ok(())
    });

    store.ingest(event(1.0, 1.0, "happy", 0.1));
    store.ingest(event(1.0, 1.0, "happy", 0.2));
    store.ingest(event(2.0, 2.0, "happy", 0.3));
    assert_eq!(*sizes.borrow(), vec![1, 1, 2]);

    assert!(store.remove_listener(id));
    assert!(!store.remove_listener(id));
    store.ingest(event(3.0, 3.0, "happy", 0.4));
    assert_eq!(sizes.borrow().len(), 3);
}

#[test]
fn test_failing_change_listener_is_isolated() {
    let store = StateStore::new(StoreConfig::default());
    let hits = Rc::new(Cell::new(0));

    store.on_change(|_| anyhow::bail!("render failed"));
    let h = hits.clone();
    store.on_change(move |_| {
        h.set(h.get() + 1);
        Ok(())
    });

    store.ingest(event(1.0, 1.0, "angry", 0.8));
    assert_eq!(hits.get(), 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_listener_can_read_store_during_notification() {
    let store = Rc::new(StateStore::new(StoreConfig::default()));
    let seen = Rc::new(Cell::new(0));

    let weak = Rc::downgrade(&store);
    let s = seen.clone();
    store.on_change(move |snapshot| {
        if let Some(store) = weak.upgrade() {
            assert_eq!(store.snapshot(), *snapshot);
            s.set(store.len());
        }
        Ok(())
    });

    store.ingest(event(1.0, 1.0, "happy", 0.5));
    assert_eq!(seen.get(), 1);
}

#[test]
fn test_attach_ingests_emotion_events_from_bus() {
    let bus = EventBus::new();
    let store = Rc::new(StateStore::new(StoreConfig::default()));
    let id = store.attach(&bus);

    bus.publish(BusEvent::Emotion(event(10.0, 20.0, "happy", 0.2)));
    bus.publish(BusEvent::Connect);
    bus.publish(BusEvent::Emotion(event(10.0, 20.0, "happy", 0.9)));

    assert_eq!(store.len(), 1);
    assert_eq!(store.snapshot()[0].event.intensity, 0.9);

    assert!(bus.unsubscribe(id));
    bus.publish(BusEvent::Emotion(event(50.0, 50.0, "sad", 0.1)));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_max_entries_evicts_least_recently_touched() {
    let store = StateStore::new(StoreConfig {
        max_entries: Some(2),
        ttl_seconds: None,
    });

    store.ingest(event(1.0, 1.0, "happy", 0.1));
    store.ingest(event(2.0, 2.0, "happy", 0.2));
    // Touch the first key again so the second becomes the oldest
    store.ingest(event(1.0, 1.0, "happy", 0.3));
    store.ingest(event(3.0, 3.0, "happy", 0.4));

    let keys: Vec<String> = store.snapshot().iter().map(|e| e.key.to_string()).collect();
    assert_eq!(keys, vec!["1,1,happy", "3,3,happy"]);
}

#[test]
fn test_ttl_expires_stale_entries() {
    let (store, seconds) = store_with_clock(StoreConfig {
        max_entries: None,
        ttl_seconds: Some(60),
    });

    store.ingest(event(1.0, 1.0, "happy", 0.1));
    seconds.set(30);
    store.ingest(event(2.0, 2.0, "sad", 0.2));

    seconds.set(61);
    assert_eq!(store.prune_expired(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.snapshot()[0].key.as_str(), "2,2,sad");

    // Ingest also prunes
    seconds.set(200);
    store.ingest(event(3.0, 3.0, "angry", 0.3));
    assert_eq!(store.len(), 1);
    assert_eq!(store.prune_expired(), 0);
}

#[test]
fn test_default_store_never_evicts() {
    let (store, seconds) = store_with_clock(StoreConfig::default());
    for i in 0..500 {
        store.ingest(event(i as f64, 0.0, "neutral", 0.5));
    }
    seconds.set(86_400 * 365);

    assert_eq!(store.prune_expired(), 0);
    assert_eq!(store.len(), 500);
}

#[test]
fn test_clear_notifies_with_empty_snapshot() {
    let store = StateStore::new(StoreConfig::default());
    store.ingest(event(1.0, 1.0, "happy", 0.5));

    let last_len = Rc::new(Cell::new(usize::MAX));
    let l = last_len.clone();
    store.on_change(move |snapshot| {
        l.set(snapshot.len());
        Ok(())
    });

    store.clear();
    assert!(store.is_empty());
    assert_eq!(last_len.get(), 0);
}
