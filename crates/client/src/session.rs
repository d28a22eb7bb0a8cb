//! Wiring between the push channel, the role catalog and the notification
//! store.
//!
//! [`Services`] lives for the whole signed-in session and owns the single
//! [`ConnectionManager`]. Each time the user's role is known (or changes) the
//! host opens a [`RoleSession`], which installs that role's handlers on the
//! existing channel and seeds a fresh store from history.

use std::sync::Arc;

use pizarra_shared::{ApiError, Role};
use tokio::sync::watch;

use crate::api_client::{ApiClient, NotificationApi};
use crate::catalog::{DomainEvent, RoleCatalog};
use crate::config::{ClientConfig, LoadRetryConfig};
use crate::identity::IdentityCache;
use crate::notifications::{NotificationSnapshot, NotificationStore};
use crate::storage::KeyValueStore;
use crate::ws::{transport_from_config, ConnectionManager, HandlerTable, TransportError};

/// Handler table that renders every event `role` subscribes to and ingests
/// it into `store`.
pub fn handlers_for(role: Role, store: &Arc<NotificationStore>) -> HandlerTable {
    let catalog = RoleCatalog::new(role);
    let mut table = HandlerTable::new();
    for &name in catalog.events() {
        let store = Arc::clone(store);
        table.insert(name.as_str(), move |payload| {
            let event = DomainEvent::from_parts(name, payload);
            match catalog.render(&event) {
                Some(template) => {
                    store.ingest(payload.clone(), template);
                }
                None => crate::log_debug!("'{}' does not apply to {}", name, role),
            }
        });
    }
    table
}

/// Long-lived client services for one signed-in user.
pub struct Services {
    identity: IdentityCache,
    api: Arc<dyn NotificationApi>,
    manager: Arc<ConnectionManager>,
    load_retry: LoadRetryConfig,
}

impl Services {
    pub fn new(
        identity: IdentityCache,
        api: Arc<dyn NotificationApi>,
        manager: Arc<ConnectionManager>,
        load_retry: LoadRetryConfig,
    ) -> Self {
        Self {
            identity,
            api,
            manager,
            load_retry,
        }
    }

    /// Build the HTTP client, transport stack and connection manager from
    /// configuration, all reading the session from `store`.
    pub fn from_config(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, TransportError> {
        let identity = IdentityCache::new(store);
        let api = ApiClient::new()
            .with_base_url(&config.api_url)
            .with_identity(identity.clone());
        let transport = transport_from_config(config)?;
        let manager = ConnectionManager::new(transport, identity.clone(), config.reconnect.clone());

        Ok(Self::new(
            identity,
            Arc::new(api),
            Arc::new(manager),
            config.load_retry.clone(),
        ))
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// A role session with an empty store. Nothing is wired until
    /// [`RoleSession::start`].
    pub fn session(&self, role: Role) -> RoleSession {
        let store = Arc::new(NotificationStore::new(
            Arc::clone(&self.api),
            self.load_retry.clone(),
        ));
        RoleSession::new(role, Arc::clone(&self.manager), store)
    }

    /// Resolve the role from the cached identity and open a session for it.
    pub async fn session_from_cache(&self) -> Option<RoleSession> {
        let role = self.identity.role().await?;
        Some(self.session(role))
    }

    /// Sign-out: close the channel.
    pub fn shutdown(&self) {
        self.manager.teardown();
    }
}

/// Notification delivery for one role.
pub struct RoleSession {
    role: Role,
    manager: Arc<ConnectionManager>,
    store: Arc<NotificationStore>,
}

impl RoleSession {
    pub fn new(role: Role, manager: Arc<ConnectionManager>, store: Arc<NotificationStore>) -> Self {
        Self {
            role,
            manager,
            store,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.store.subscribe()
    }

    /// Install this role's handlers, make sure the channel is up (or
    /// re-registered) for `user_id`, then seed the store from history.
    ///
    /// Live events arriving while history loads are kept. A failed history
    /// fetch is returned but leaves the live feed running.
    pub async fn start(&self, user_id: u64) -> Result<usize, ApiError> {
        self.manager.register_handlers(handlers_for(self.role, &self.store));
        self.manager.initialize(user_id);
        crate::log_info!("Role session started for user {} as {}", user_id, self.role);
        self.store.load().await
    }

    /// Re-fetch history, e.g. on pull-to-refresh.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        self.store.load().await
    }

    pub fn mark_all_read(&self) -> tokio::task::JoinHandle<Result<(), ApiError>> {
        self.store.mark_all_read()
    }
}
