//! Push channel: connection lifecycle, transports, and event routing.
//!
//! This module provides:
//! - A single long-lived channel per signed-in session with bounded
//!   auto-reconnect
//! - WebSocket transport with long-polling fallback
//! - A registration handshake on every (re)connect
//! - Trampoline dispatch into a swappable handler table
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │   initialize / register_handlers / teardown         │
//! └─────────────────────────────────────────────────────┘
//!            │                              │
//!            ▼                              ▼
//!   ┌──────────────────┐          ┌──────────────────┐
//!   │    Transport     │          │   EventRouter    │
//!   │ websocket → poll │─frames──▶│  (trampolines)   │
//!   └──────────────────┘          └──────────────────┘
//!            ▲                              │
//!    register on every                      ▼
//!     connected signal            ┌──────────────────┐
//!                                 │  HandlerTable    │
//!                                 │ (swapped whole)  │
//!                                 └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(transport, identity, ReconnectConfig::default());
//! manager.register_handlers(HandlerTable::new().on("anuncio", |payload| {
//!     println!("{payload}");
//! }));
//! manager.initialize(user_id);
//! // ...on sign-out
//! manager.teardown();
//! ```

mod manager;
mod router;
mod state;
mod transport;

pub use manager::ConnectionManager;
pub use router::{DispatchOutcome, EventRouter, Handler, HandlerTable};
pub use state::{ConnectionError, ConnectionState};
pub use transport::{
    from_config as transport_from_config, FallbackTransport, PollingTransport, Transport,
    TransportError, TransportLink, WebSocketTransport,
};
