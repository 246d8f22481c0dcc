//! Real-time client core: one gateway connection per session, presence and
//! typing state, room membership, optimistic message relay and a typed event
//! bus for UI layers to subscribe to.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod session;

pub use client::ChatClient;
pub use config::{ClientConfig, PreferenceStore, Preferences, ThemeMode};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::ClientError;
pub use event_bus::{ClientEvent, EventBus, EventFilter, EventKind, Subscription};
pub use relay::{Delivery, Draft, ThreadEntry};
pub use session::Session;
