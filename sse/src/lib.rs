//! Server-Sent Events (SSE) client for the users event stream.
//!
//! # Architecture
//!
//! - **One connection per client**: `EventStreamClient` owns a single push
//!   connection and re-opens it after failures at a fixed interval, up to a
//!   bounded number of consecutive attempts. A successful open resets the count.
//! - **Dual-index listener registry**: listeners are stored by id for removal and
//!   indexed by scope (one event kind, or every event) for fan-out.
//! - **Isolation**: a panicking listener is logged and skipped; delivery to the
//!   remaining listeners and the connection itself are unaffected.
//! - **Pluggable transport**: the wire side sits behind `Transport`, with an
//!   `eventsource-client` implementation for production.
//!
//! # Example
//!
//! ```rust,ignore
//! use sse::{EventStreamClient, ListenerScope};
//!
//! let client = EventStreamClient::from_config(&config, tokens)?;
//! client.on_user_created(|data| println!("{} joined", data.user.name));
//! client.add_listener(ListenerScope::All, |envelope| println!("{}", envelope.kind()));
//! client.connect();
//! ```
//!
//! # Modules
//!
//! - `client`: connection lifecycle and reconnect policy
//! - `listener`: listener registry and panic isolation
//! - `state`: observable connection state
//! - `transport`: frame source abstraction and the `eventsource-client` adapter
//! - `user_events`: typed subscriptions per users event

pub mod client;
pub mod listener;
pub mod state;
pub mod transport;
pub mod user_events;

pub use client::{EventStreamClient, StreamConfig};
pub use listener::{ListenerId, ListenerScope, Subscription};
pub use state::{ConnectionState, ConnectionStatus};
