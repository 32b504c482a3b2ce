// Integration tests for the full ingestion pipeline
//
// Wires EventBus -> ConnectionManager -> StateStore the way a UI composition
// root does, with the in-memory connector standing in for the server and
// simulated time standing in for the retry timer.

use emotion_stream::{
    bus::{BusEvent, EventBus, Topic},
    connection::{ConnectionManager, ConnectionState, ReconnectPolicy},
    state::{Snapshot, StateStore, StoreConfig},
    transport::memory::{ManualScheduler, MemoryConnector, MemoryLink},
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

const URL: &str = "ws://localhost:8080/ws";

// ── Test composition root ────────────────────────────────────────────────────

struct Client {
    bus: Rc<EventBus>,
    connector: MemoryConnector,
    scheduler: ManualScheduler,
    manager: Rc<ConnectionManager>,
    store: Rc<StateStore>,
    renders: Rc<RefCell<Vec<Snapshot>>>,
}

fn client(store_config: StoreConfig) -> Client {
    let bus = Rc::new(EventBus::new());
    let connector = MemoryConnector::new();
    let scheduler = ManualScheduler::new();

    let store = Rc::new(StateStore::new(store_config));
    store.attach(&bus);

    let renders = Rc::new(RefCell::new(Vec::new()));
    let r = renders.clone();
    store.on_change(move |snapshot| {
        r.borrow_mut().push(snapshot.clone());
        Ok(())
    });

    let manager = ConnectionManager::new(
        bus.clone(),
        Rc::new(connector.clone()),
        Rc::new(scheduler.clone()),
        ReconnectPolicy::fixed(5, Duration::from_secs(3)),
    );

    Client {
        bus,
        connector,
        scheduler,
        manager,
        store,
        renders,
    }
}

impl Client {
    fn link(&self) -> MemoryLink {
        self.connector.last().unwrap()
    }

    fn online(&self) -> MemoryLink {
        self.manager.connect(URL);
        let link = self.link();
        link.accept();
        link
    }
}

fn emotion(lat: f64, lng: f64, emotion: &str, intensity: f64) -> String {
    json!({
        "type": "emotion",
        "data": { "lat": lat, "lng": lng, "emotion": emotion, "intensity": intensity }
    })
    .to_string()
}

// ── Dedup through the wire ───────────────────────────────────────────────────

#[test]
fn test_duplicate_frames_merge_into_one_entry() {
    let c = client(StoreConfig::default());
    let link = c.online();

    link.deliver(&emotion(10.0, 20.0, "happy", 0.2));
    link.deliver(&emotion(10.0, 20.0, "happy", 0.9));

    let snapshot = c.store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event.intensity, 0.9);
    assert_eq!(c.renders.borrow().len(), 2);
}

#[test]
fn test_malformed_frame_then_valid_frame_ingests_once() {
    let c = client(StoreConfig::default());
    let link = c.online();

    let transitions = Rc::new(Cell::new(0));
    let t = transitions.clone();
    c.bus.subscribe(Topic::StateChanged, move |_| {
        t.set(t.get() + 1);
        Ok(())
    });

    link.deliver("{\"type\": \"emotion\", \"data\": ");
    link.deliver(&emotion(48.85, 2.35, "surprised", 0.6));

    assert_eq!(c.renders.borrow().len(), 1);
    assert_eq!(c.store.len(), 1);
    assert_eq!(transitions.get(), 0);
    assert_eq!(c.manager.state(), ConnectionState::Connected);
}

#[test]
fn test_annotations_survive_the_pipeline() {
    let c = client(StoreConfig::default());
    let link = c.online();

    link.deliver(
        &json!({
            "type": "emotion",
            "data": {
                "lat": -16.5, "lng": -68.15, "emotion": "angry", "intensity": 0.75,
                "city": "La Paz", "country": "Bolivia", "text": "Protestas en el centro"
            }
        })
        .to_string(),
    );

    let snapshot = c.store.snapshot();
    let entry = &snapshot[0];
    assert_eq!(entry.event.city.as_deref(), Some("La Paz"));
    assert_eq!(entry.event.country.as_deref(), Some("Bolivia"));
    assert_eq!(entry.event.text.as_deref(), Some("Protestas en el centro"));
}

#[test]
fn test_non_emotion_frames_do_not_reach_store() {
    let c = client(StoreConfig::default());
    let link = c.online();

    let messages = Rc::new(Cell::new(0));
    let m = messages.clone();
    c.bus.subscribe(Topic::Message, move |_| {
        m.set(m.get() + 1);
        Ok(())
    });

    link.deliver(&json!({"type": "info", "data": {"status": "processing"}}).to_string());
    link.deliver(&json!({"type": "error", "data": {"message": "upstream down"}}).to_string());

    assert_eq!(messages.get(), 2);
    assert!(c.store.is_empty());
}

// ── Listener isolation with the store in the loop ────────────────────────────

#[test]
fn test_throwing_emotion_listener_does_not_starve_store() {
    let bus = Rc::new(EventBus::new());
    bus.subscribe(Topic::Emotion, |_| anyhow::bail!("marker layer not ready"));

    let store = Rc::new(StateStore::new(StoreConfig::default()));
    store.attach(&bus);

    let connector = MemoryConnector::new();
    let manager = ConnectionManager::new(
        bus,
        Rc::new(connector.clone()),
        Rc::new(ManualScheduler::new()),
        ReconnectPolicy::default(),
    );
    manager.connect(URL);
    let link = connector.last().unwrap();
    link.accept();
    link.deliver(&emotion(1.0, 2.0, "sad", 0.4));

    assert_eq!(store.len(), 1);
}

// ── Reconnect behavior ───────────────────────────────────────────────────────

#[test]
fn test_store_survives_reconnect() {
    let c = client(StoreConfig::default());
    let link = c.online();
    link.deliver(&emotion(10.0, 20.0, "happy", 0.2));

    link.drop_connection();
    assert_eq!(c.manager.state(), ConnectionState::Reconnecting);
    c.scheduler.advance(Duration::from_secs(3));

    let second = c.link();
    assert_eq!(c.connector.attempts(), 2);
    second.accept();
    second.deliver(&emotion(10.0, 20.0, "happy", 0.5));
    second.deliver(&emotion(11.0, 20.0, "happy", 0.5));

    let snapshot = c.store.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].event.intensity, 0.5);
}

#[test]
fn test_failed_state_is_observable() {
    let c = client(StoreConfig::default());
    let failed = Rc::new(Cell::new(false));

    let f = failed.clone();
    c.bus.subscribe(Topic::StateChanged, move |event| {
        if let BusEvent::StateChanged {
            to: ConnectionState::Failed,
            ..
        } = event
        {
            f.set(true);
        }
        Ok(())
    });

    c.manager.connect(URL);
    for _ in 0..5 {
        assert!(!failed.get());
        c.link().refuse();
        c.scheduler.advance(Duration::from_secs(3));
    }

    assert!(failed.get());
    assert_eq!(c.manager.state(), ConnectionState::Failed);
    assert_eq!(c.connector.attempts(), 5);

    // Manual retry offered by the UI
    c.manager.connect(URL);
    c.link().accept();
    assert_eq!(c.manager.state(), ConnectionState::Connected);
}

#[test]
fn test_explicit_disconnect_keeps_snapshot_and_stops_retries() {
    let c = client(StoreConfig::default());
    let link = c.online();
    link.deliver(&emotion(5.0, 5.0, "neutral", 0.1));
    link.drop_connection();

    c.manager.disconnect();
    c.manager.disconnect();
    c.scheduler.advance(Duration::from_secs(120));

    assert_eq!(c.manager.state(), ConnectionState::Disconnected);
    assert_eq!(c.connector.attempts(), 1);
    assert_eq!(c.scheduler.pending(), 0);
    assert_eq!(c.store.len(), 1);
}

// ── Independent instances ────────────────────────────────────────────────────

#[test]
fn test_two_clients_are_independent() {
    let a = client(StoreConfig::default());
    let b = client(StoreConfig::default());

    a.online().deliver(&emotion(1.0, 1.0, "happy", 1.0));
    b.manager.connect(URL);

    assert_eq!(a.store.len(), 1);
    assert!(b.store.is_empty());
    assert_eq!(a.manager.state(), ConnectionState::Connected);
    assert_eq!(b.manager.state(), ConnectionState::Connecting);

    a.manager.disconnect();
    assert_eq!(b.manager.state(), ConnectionState::Connecting);
}

#[test]
fn test_bounded_store_through_pipeline() {
    let c = client(StoreConfig {
        max_entries: Some(3),
        ttl_seconds: None,
    });
    let link = c.online();

    for i in 0..10 {
        link.deliver(&emotion(i as f64, 0.0, "happy", 0.5));
    }

    let keys: Vec<String> = c.store.snapshot().iter().map(|e| e.key.to_string()).collect();
    assert_eq!(keys, vec!["7,0,happy", "8,0,happy", "9,0,happy"]);
}
