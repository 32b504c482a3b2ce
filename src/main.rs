use anyhow::{bail, Result};
use emotion_stream::{
    bus::{BusEvent, EventBus, Topic},
    config::{load_config, ClientConfig},
    connection::{ConnectionManager, ConnectionState},
    state::StateStore,
    transport::tokio_ws::{TokioConnector, TokioScheduler},
};
use std::rc::Rc;
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emotion_stream=info".into()),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => ClientConfig::default(),
    };
    config.apply_env();

    info!(url = %config.connection.url, "Emotion stream client starting...");

    // Everything runs on one thread, like the browser event loop
    LocalSet::new().run_until(run(config)).await
}

async fn run(config: ClientConfig) -> Result<()> {
    let bus = Rc::new(EventBus::new());

    let store = Rc::new(StateStore::new(config.store.clone()));
    store.attach(&bus);
    store.on_change(|snapshot| {
        if let Some(latest) = snapshot.last() {
            info!(
                entries = snapshot.len(),
                emotion = %latest.event.emotion,
                intensity = latest.event.intensity,
                lat = latest.event.latitude,
                lng = latest.event.longitude,
                city = latest.event.city.as_deref().unwrap_or("-"),
                "Snapshot updated"
            );
        }
        Ok(())
    });

    let failed = Rc::new(Notify::new());
    {
        let failed = failed.clone();
        bus.subscribe(Topic::StateChanged, move |event| {
            if let BusEvent::StateChanged { from, to } = event {
                info!(from = %from, to = %to, "Connection state changed");
                if *to == ConnectionState::Failed {
                    failed.notify_one();
                }
            }
            Ok(())
        });
    }

    let manager = ConnectionManager::new(
        bus.clone(),
        Rc::new(TokioConnector),
        Rc::new(TokioScheduler),
        config.connection.policy(),
    );
    manager.connect(&config.connection.url);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
            manager.disconnect();
        }
        _ = failed.notified() => {
            bail!(
                "giving up on {} after {} attempts",
                config.connection.url,
                manager.policy().max_attempts
            );
        }
    }

    info!(entries = store.len(), "Emotion stream client stopped");
    Ok(())
}
