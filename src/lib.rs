// Wire contract: envelopes and emotion events
pub mod event;

// Typed publish/subscribe hub
pub mod bus;

// Transport and timer seams (in-memory, native WebSocket)
pub mod transport;

// Connection lifecycle and reconnect policy
pub mod connection;

// Deduplicated emotion state
pub mod state;

// Client configuration
pub mod config;
