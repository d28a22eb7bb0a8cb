//! Pizarra Client - real-time notification core
//!
//! Keeps one push channel open for the signed-in session, re-registers on
//! every reconnect, and turns role-relevant domain events into a read/unread
//! notification feed.

pub mod logging;

pub mod api_client;
pub mod catalog;
pub mod config;
pub mod identity;
pub mod notifications;
pub mod session;
pub mod storage;
pub mod ws;

pub use api_client::{ApiClient, NotificationApi};
pub use catalog::{DeepLink, DomainEvent, EventName, NotificationTemplate, RoleCatalog};
pub use config::{ClientConfig, LoadRetryConfig, ReconnectConfig, TransportMode};
pub use identity::IdentityCache;
pub use notifications::{Notification, NotificationSnapshot, NotificationStore, Origin};
pub use session::{handlers_for, RoleSession, Services};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use ws::{ConnectionManager, ConnectionState, EventRouter, HandlerTable};
