//! `pizarra-bell`: headless notification bell.
//!
//! Reads the session the host app cached on disk, connects as the cached
//! user and logs every new notification and the unread count until Ctrl-C.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use pizarra_client::{logging, ClientConfig, FileStore, KeyValueStore, Services};
use pizarra_shared::Role;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(logging::DEFAULT_FILTER);

    let config = ClientConfig::from_env();
    let store: Arc<dyn KeyValueStore> = match &config.storage_dir {
        Some(dir) => Arc::new(FileStore::new(dir)),
        None => Arc::new(
            FileStore::default_location()
                .context("no platform config directory, set PIZARRA_STORAGE_DIR")?,
        ),
    };

    let services = Services::from_config(&config, store).context("invalid socket url")?;

    let user_id = match std::env::var("PIZARRA_USER_ID") {
        Ok(raw) => raw.trim().parse().context("PIZARRA_USER_ID must be a number")?,
        Err(_) => services
            .identity()
            .user()
            .await
            .map(|user| user.id)
            .ok_or_else(|| anyhow!("no cached user, set PIZARRA_USER_ID"))?,
    };
    let role = match std::env::var("PIZARRA_ROLE") {
        Ok(raw) => Role::parse(&raw).ok_or_else(|| anyhow!("unknown role '{raw}'"))?,
        Err(_) => services
            .identity()
            .role()
            .await
            .ok_or_else(|| anyhow!("no cached role, set PIZARRA_ROLE"))?,
    };

    let session = services.session(role);
    if let Err(e) = session.start(user_id).await {
        pizarra_client::log_warn!("History unavailable, showing live notifications only: {}", e);
    }

    let mut feed = session.subscribe();
    let mut connection = services.manager().state();
    let mut seen: HashSet<String> = feed
        .borrow()
        .notifications
        .iter()
        .map(|n| n.id.clone())
        .collect();
    pizarra_client::log_info!("{} unread", feed.borrow().unread);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = feed.borrow_and_update().clone();
                for n in snapshot.notifications.iter().rev() {
                    if seen.insert(n.id.clone()) {
                        pizarra_client::log_info!("[{}] {}: {}", n.kind.as_str(), n.title, n.body);
                    }
                }
                pizarra_client::log_info!("{} unread", snapshot.unread);
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().clone();
                pizarra_client::log_info!("Connection: {:?}", state);
            }
        }
    }

    pizarra_client::log_info!("Shutting down");
    services.shutdown();
    Ok(())
}
