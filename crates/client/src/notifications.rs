//! Role-scoped notification feed.
//!
//! Holds the merged history and live notifications, their read state, and
//! publishes a fresh [`NotificationSnapshot`] to subscribers after every
//! mutation. Entries are kept in arrival order (newest first); consumers get
//! them sorted by creation time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pizarra_shared::{ApiError, NotificationKind, NotificationRecord};
use rand::Rng;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::NotificationApi;
use crate::catalog::{DeepLink, NotificationTemplate};
use crate::config::LoadRetryConfig;

/// Maximum number of live entries kept; the oldest live entry goes first.
pub const MAX_LIVE_ENTRIES: usize = 50;

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fetched from the history endpoint.
    History,
    /// Pushed over the real-time channel during this session.
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub deep_link: Option<DeepLink>,
    pub raw_payload: Value,
    pub origin: Origin,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    fn from_record(record: NotificationRecord) -> Self {
        let created_at = record.created_at().unwrap_or_default();
        let read_at = record.read_at();
        let raw_payload = serde_json::to_value(&record).unwrap_or(Value::Null);
        Self {
            kind: record.kind(),
            id: record.id,
            title: record.titulo,
            body: record.mensaje,
            created_at,
            read_at,
            deep_link: None,
            raw_payload,
            origin: Origin::History,
        }
    }
}

/// What subscribers observe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    /// Sorted by `created_at`, newest first.
    pub notifications: Vec<Notification>,
    pub unread: usize,
    /// Whether a history fetch has succeeded at least once.
    pub loaded: bool,
}

#[derive(Debug, Default)]
struct Feed {
    /// Arrival order, newest first.
    entries: Vec<Notification>,
    loaded: bool,
}

impl Feed {
    fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|n| n.id == id)
    }

    fn unread(&self) -> usize {
        self.entries.iter().filter(|n| !n.is_read()).count()
    }

    fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            notifications: sorted_by_creation(&self.entries),
            unread: self.unread(),
            loaded: self.loaded,
        }
    }

    /// Replace the history portion. Live entries stay in front, read state is
    /// carried over from entries already marked read.
    fn merge_history(&mut self, records: Vec<NotificationRecord>) -> usize {
        let previous = std::mem::take(&mut self.entries);
        let (live, old_history): (Vec<_>, Vec<_>) =
            previous.into_iter().partition(|n| n.origin == Origin::Live);

        self.entries = live;
        for record in records {
            let mut incoming = Notification::from_record(record);
            if self.contains(&incoming.id) {
                crate::log_debug!("Skipping duplicate notification id {}", incoming.id);
                continue;
            }
            if incoming.read_at.is_none() {
                incoming.read_at = old_history
                    .iter()
                    .find(|n| n.id == incoming.id)
                    .and_then(|n| n.read_at);
            }
            self.entries.push(incoming);
        }
        self.loaded = true;
        self.entries.len()
    }

    fn evict_live_overflow(&mut self) {
        while self.entries.iter().filter(|n| n.origin == Origin::Live).count() > MAX_LIVE_ENTRIES {
            match self.entries.iter().rposition(|n| n.origin == Origin::Live) {
                Some(oldest) => {
                    let evicted = self.entries.remove(oldest);
                    crate::log_debug!("Evicted live notification {}", evicted.id);
                }
                None => break,
            }
        }
    }
}

fn sorted_by_creation(entries: &[Notification]) -> Vec<Notification> {
    let mut sorted = entries.to_vec();
    // Stable sort keeps arrival order among equal timestamps.
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted
}

fn synthesize_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{:08x}", now.timestamp_millis(), suffix)
}

/// Notification feed for one signed-in role.
pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    retry: LoadRetryConfig,
    feed: Mutex<Feed>,
    snapshot: watch::Sender<NotificationSnapshot>,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>, retry: LoadRetryConfig) -> Self {
        let (snapshot, _) = watch::channel(NotificationSnapshot::default());
        Self {
            api,
            retry,
            feed: Mutex::new(Feed::default()),
            snapshot,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Feed> {
        self.feed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, feed: &Feed) {
        self.snapshot.send_replace(feed.snapshot());
    }

    /// Fetch history and merge it in.
    ///
    /// Only a missing-credentials error is retried, since the host may still
    /// be writing the session to the local store. Any failure leaves the list
    /// untouched. Returns the number of entries after the merge.
    pub async fn load(&self) -> Result<usize, ApiError> {
        let mut retries = 0;
        let records = loop {
            match self.api.fetch_notifications().await {
                Ok(records) => break records,
                Err(e) if e.is_not_ready() && retries < self.retry.max_retries => {
                    retries += 1;
                    crate::log_debug!(
                        "Credentials not ready, retrying history fetch ({}/{})",
                        retries,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(self.retry.delay_ms)).await;
                }
                Err(e) => {
                    crate::log_error!("Failed to load notifications: {}", e);
                    return Err(e);
                }
            }
        };

        let fetched = records.len();
        let mut feed = self.lock();
        let total = feed.merge_history(records);
        self.publish(&feed);
        crate::log_info!("Loaded {} notifications ({} in feed)", fetched, total);
        Ok(total)
    }

    /// Add a live notification rendered from a pushed event.
    pub fn ingest(&self, raw_payload: Value, template: NotificationTemplate) -> Notification {
        let now = Utc::now();
        let mut feed = self.lock();

        let mut id = synthesize_id(now);
        while feed.contains(&id) {
            id = synthesize_id(now);
        }

        let notification = Notification {
            id,
            kind: template.kind,
            title: template.title,
            body: template.body,
            created_at: now,
            read_at: None,
            deep_link: template.deep_link,
            raw_payload,
            origin: Origin::Live,
        };
        feed.entries.insert(0, notification.clone());
        feed.evict_live_overflow();
        self.publish(&feed);

        crate::log_debug!("Ingested notification {} ({})", notification.id, notification.kind.as_str());
        notification
    }

    /// Mark everything read locally, then persist in the background.
    ///
    /// The local change is never rolled back; a failed request is only
    /// logged. Must be called from within a tokio runtime.
    pub fn mark_all_read(&self) -> JoinHandle<Result<(), ApiError>> {
        let now = Utc::now();
        {
            let mut feed = self.lock();
            for entry in feed.entries.iter_mut().filter(|n| n.read_at.is_none()) {
                entry.read_at = Some(now);
            }
            self.publish(&feed);
        }

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let result = api.mark_all_read().await;
            if let Err(e) = &result {
                crate::log_warn!("Failed to persist mark-all-read: {}", e);
            }
            result
        })
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread()
    }

    /// All entries, newest `created_at` first.
    pub fn notifications(&self) -> Vec<Notification> {
        sorted_by_creation(&self.lock().entries)
    }

    /// All entries in arrival order, newest arrival first.
    pub fn history(&self) -> Vec<Notification> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        fetches: Mutex<VecDeque<Result<Vec<NotificationRecord>, ApiError>>>,
        fetch_calls: AtomicUsize,
        mark_calls: AtomicUsize,
        mark_fails: bool,
    }

    impl FakeApi {
        fn with_fetches(fetches: Vec<Result<Vec<NotificationRecord>, ApiError>>) -> Self {
            Self {
                fetches: Mutex::new(fetches.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NotificationApi for FakeApi {
        async fn fetch_notifications(&self) -> Result<Vec<NotificationRecord>, ApiError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.fetches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn mark_all_read(&self) -> Result<(), ApiError> {
            self.mark_calls.fetch_add(1, Ordering::SeqCst);
            if self.mark_fails {
                Err(ApiError::Network("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn record(id: u64, leida: bool, fecha: &str) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            tipo: "tarea".into(),
            titulo: format!("Aviso {id}"),
            mensaje: "mensaje".into(),
            leida,
            fecha_creacion: fecha.into(),
            fecha_lectura: None,
        }
    }

    fn template(title: &str) -> NotificationTemplate {
        NotificationTemplate {
            kind: NotificationKind::General,
            title: title.into(),
            body: "cuerpo".into(),
            deep_link: None,
        }
    }

    fn store(api: FakeApi) -> (Arc<FakeApi>, NotificationStore) {
        let api = Arc::new(api);
        let store = NotificationStore::new(api.clone(), LoadRetryConfig::default());
        (api, store)
    }

    #[tokio::test]
    async fn load_merges_history_sorted_by_creation() {
        let (_, store) = store(FakeApi::with_fetches(vec![Ok(vec![
            record(1, false, "2024-03-01 08:00:00"),
            record(2, true, "2024-03-02 08:00:00"),
        ])]));

        assert_eq!(store.load().await.unwrap(), 2);
        assert!(store.is_loaded());
        assert_eq!(store.unread_count(), 1);
        let ids: Vec<_> = store.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert!(store.notifications().iter().all(|n| n.origin == Origin::History));
    }

    #[tokio::test]
    async fn live_ids_are_unique() {
        let (_, store) = store(FakeApi::default());
        let ids: HashSet<_> = (0..200)
            .map(|i| store.ingest(Value::Null, template(&format!("n{i}"))).id)
            .collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(store.len(), MAX_LIVE_ENTRIES);
    }

    #[tokio::test]
    async fn live_cap_evicts_oldest_live_entry() {
        let (_, store) = store(FakeApi::with_fetches(vec![Ok(vec![record(
            1,
            false,
            "2024-03-01 08:00:00",
        )])]));
        store.load().await.unwrap();

        let first = store.ingest(Value::Null, template("primera"));
        for i in 1..=MAX_LIVE_ENTRIES {
            store.ingest(Value::Null, template(&format!("n{i}")));
        }

        let history = store.history();
        let live = history.iter().filter(|n| n.origin == Origin::Live).count();
        assert_eq!(live, MAX_LIVE_ENTRIES);
        assert!(!history.iter().any(|n| n.id == first.id));
        assert!(history.iter().any(|n| n.id == "1"));
        assert_eq!(history[0].title, format!("n{MAX_LIVE_ENTRIES}"));
    }

    #[tokio::test]
    async fn reload_keeps_live_entries_and_read_state() {
        let (_, store) = store(FakeApi::with_fetches(vec![
            Ok(vec![record(1, false, "2024-03-01 08:00:00")]),
            Ok(vec![
                record(1, false, "2024-03-01 08:00:00"),
                record(3, false, "2024-03-03 08:00:00"),
            ]),
        ]));
        store.load().await.unwrap();
        let live = store.ingest(Value::Null, template("en vivo"));

        let persisted = store.mark_all_read();
        persisted.await.unwrap().unwrap();
        assert_eq!(store.unread_count(), 0);

        // Server still reports id 1 as unread; local read state wins.
        store.load().await.unwrap();
        let history = store.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, live.id);
        assert!(history.iter().find(|n| n.id == "1").unwrap().is_read());
        assert!(history.iter().find(|n| n.id == live.id).unwrap().is_read());
        assert!(!history.iter().find(|n| n.id == "3").unwrap().is_read());
        assert_eq!(store.unread_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_history_ids_are_collapsed() {
        let (_, store) = store(FakeApi::with_fetches(vec![Ok(vec![
            record(5, false, "2024-03-01 08:00:00"),
            record(5, true, "2024-03-01 08:00:00"),
        ])]));
        assert_eq!(store.load().await.unwrap(), 1);
        assert_eq!(store.unread_count(), 1);
    }

    #[tokio::test]
    async fn mark_all_read_is_optimistic_when_network_fails() {
        let api = FakeApi {
            mark_fails: true,
            ..Default::default()
        };
        let (api, store) = store(api);
        store.ingest(Value::Null, template("a"));
        store.ingest(Value::Null, template("b"));

        let handle = store.mark_all_read();
        assert_eq!(store.unread_count(), 0);

        assert!(handle.await.unwrap().is_err());
        assert_eq!(api.mark_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.unread_count(), 0);
        assert!(store.notifications().iter().all(Notification::is_read));
    }

    #[tokio::test(start_paused = true)]
    async fn load_retries_missing_credentials_only() {
        let (api, store) = store(FakeApi::with_fetches(vec![
            Err(ApiError::MissingCredentials("token".into())),
            Err(ApiError::MissingCredentials("token".into())),
            Ok(vec![record(1, false, "2024-03-01 08:00:00")]),
        ]));
        assert_eq!(store.load().await.unwrap(), 1);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 3);

        let (api, store) = store_with_error(ApiError::Http {
            status: 500,
            body: "boom".into(),
        });
        assert!(store.load().await.is_err());
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
        assert!(!store.is_loaded());
    }

    fn store_with_error(error: ApiError) -> (Arc<FakeApi>, NotificationStore) {
        store(FakeApi::with_fetches(vec![Err(error)]))
    }

    #[tokio::test(start_paused = true)]
    async fn load_gives_up_after_retry_budget() {
        let (api, store) = store(FakeApi::with_fetches(
            (0..10)
                .map(|_| Err(ApiError::MissingCredentials("token".into())))
                .collect(),
        ));
        store.ingest(Value::Null, template("en vivo"));

        let err = store.load().await.unwrap_err();
        assert!(err.is_not_ready());
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let (_, store) = store(FakeApi::default());
        let mut rx = store.subscribe();
        assert_eq!(rx.borrow().unread, 0);

        store.ingest(Value::Null, template("a"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().unread, 1);

        store.mark_all_read().await.unwrap().unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.unread, 0);
        assert_eq!(snapshot.notifications.len(), 1);
    }
}
