//! HTTP API client for the notification endpoints.

use async_trait::async_trait;
use pizarra_shared::{ApiError, NotificationRecord, NotificationsResponse};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::identity::IdentityCache;

/// History endpoint.
pub const NOTIFICATIONS_PATH: &str = "/notifications/mine";
/// Bulk read-acknowledgement endpoint.
pub const MARK_ALL_READ_PATH: &str = "/notifications/mark-all-read";

/// The HTTP operations the notification store depends on.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Fetch the signed-in user's notification history.
    async fn fetch_notifications(&self) -> Result<Vec<NotificationRecord>, ApiError>;

    /// Ask the server to mark every notification as read.
    async fn mark_all_read(&self) -> Result<(), ApiError>;
}

/// HTTP client authenticating with the bearer token cached by the host app.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    identity: Option<IdentityCache>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            identity: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Read the bearer token from the local session store on every request
    pub fn with_identity(mut self, identity: IdentityCache) -> Self {
        self.identity = Some(identity);
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    async fn bearer(&self) -> Result<String, ApiError> {
        match &self.identity {
            Some(identity) => identity
                .token()
                .await
                .ok_or_else(|| ApiError::MissingCredentials("no cached token".to_string())),
            None => Err(ApiError::MissingCredentials(
                "client has no credential source".to_string(),
            )),
        }
    }

    /// Send an authenticated request and return the body of a 2xx response.
    async fn execute(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let token = self.bearer().await?;
        let resp = rb
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.execute(self.client.get(self.url(path))).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn fetch_notifications(&self) -> Result<Vec<NotificationRecord>, ApiError> {
        let resp: NotificationsResponse = self.get_json(NOTIFICATIONS_PATH).await?;
        if !resp.success {
            return Err(ApiError::Rejected(
                resp.message.unwrap_or_else(|| "success: false".to_string()),
            ));
        }
        let (records, rejected) = resp.into_records();
        for e in &rejected {
            crate::log_warn!("Skipping unreadable notification row: {}", e);
        }
        Ok(records)
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        // Acknowledgement only; whatever body comes back is ignored.
        self.execute(self.client.put(self.url(MARK_ALL_READ_PATH)))
            .await
            .map(|_| ())
    }
}
