//! Physical transports for the push channel.
//!
//! A transport turns a base URL into a [`TransportLink`]: an outbound queue
//! and an inbound stream of [`WireEvent`]s, bridged to the network by
//! background tasks. The link is closed once `inbound` yields `None`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use pizarra_shared::{PollSession, WireEvent, POLL_PATH, WS_PATH};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::{ClientConfig, TransportMode};

/// An open bidirectional link to the push server.
pub struct TransportLink {
    /// Name of the transport that produced this link.
    pub transport: &'static str,
    pub outbound: UnboundedSender<WireEvent>,
    pub inbound: UnboundedReceiver<WireEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("websocket connect failed: {0}")]
    WebSocket(String),
    #[error("polling handshake failed: {0}")]
    Polling(String),
    #[error("no transport could connect: {0}")]
    Exhausted(String),
}

/// Something that can open a [`TransportLink`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<TransportLink, TransportError>;
}

/// Build the transport stack selected by the configuration.
pub fn from_config(config: &ClientConfig) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportMode::WebSocket => Arc::new(WebSocketTransport::new(&config.socket_url)?),
        TransportMode::Polling => Arc::new(PollingTransport::new(&config.socket_url)?),
        TransportMode::Auto => Arc::new(FallbackTransport::new(
            Box::new(WebSocketTransport::new(&config.socket_url)?),
            Box::new(PollingTransport::new(&config.socket_url)?),
        )),
    };
    Ok(transport)
}

/// Rewrite `base` to the given scheme family and append `path`.
fn endpoint(base: &str, secure_scheme: &str, plain_scheme: &str, path: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: base.to_string(),
        reason,
    };

    let mut url = url::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let secure = matches!(url.scheme(), "https" | "wss");
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    url.set_scheme(if secure { secure_scheme } else { plain_scheme })
        .map_err(|_| invalid("cannot change scheme".to_string()))?;

    let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    Ok(url.to_string())
}

/// WebSocket transport using tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            url: endpoint(base_url, "wss", "ws", WS_PATH)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (inbound_tx, inbound_rx) = unbounded::<WireEvent>();
        let (outbound_tx, mut outbound_rx) = unbounded::<WireEvent>();

        // Read task: frames -> inbound queue. Ends the link when it returns.
        let url_for_read = self.url.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match WireEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if inbound_tx.unbounded_send(event).is_err() {
                                // Link dropped by its owner
                                break;
                            }
                        }
                        Err(e) => crate::log_error!("Failed to parse frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        crate::log_info!("WebSocket to {} received close frame", url_for_read);
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        // Pong is handled automatically by tungstenite
                        crate::log_debug!("Received ping: {:?}", data);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        crate::log_error!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
        });

        // Write task: outbound queue -> frames.
        let url_for_write = self.url.clone();
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.next().await {
                match event.encode() {
                    Ok(json) => {
                        crate::log_debug!("Sending to {}: {}", url_for_write, json);
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            crate::log_error!("Send failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => crate::log_error!("Serialize failed: {}", e),
                }
            }
            let _ = write.close().await;
        });

        Ok(TransportLink {
            transport: self.name(),
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// HTTP long-polling transport.
///
/// `POST {base}/realtime/poll` opens a session and returns `{ sid }`.
/// `GET {base}/realtime/poll?sid=..` blocks server-side and returns a JSON
/// array of envelopes (empty on timeout). `POST {base}/realtime/poll?sid=..`
/// carries one outbound envelope. A 404 or 410 on poll means the server
/// dropped the session.
#[derive(Debug, Clone)]
pub struct PollingTransport {
    url: String,
    client: reqwest::Client,
    retry_pause: Duration,
}

impl PollingTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            url: endpoint(base_url, "https", "http", POLL_PATH)?,
            client: reqwest::Client::new(),
            retry_pause: Duration::from_millis(250),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn session_url(&self, sid: &str) -> String {
        format!("{}?sid={}", self.url, urlencoding::encode(sid))
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| TransportError::Polling(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::Polling(format!("HTTP {}", resp.status())));
        }
        let session: PollSession = resp
            .json()
            .await
            .map_err(|e| TransportError::Polling(e.to_string()))?;

        let session_url = self.session_url(&session.sid);
        let (inbound_tx, inbound_rx) = unbounded::<WireEvent>();
        let (outbound_tx, mut outbound_rx) = unbounded::<WireEvent>();

        // Poll task. Dropping `inbound_tx` on exit closes the link.
        let client = self.client.clone();
        let poll_url = session_url.clone();
        let retry_pause = self.retry_pause;
        tokio::spawn(async move {
            let mut consecutive_errors = 0u32;
            while !inbound_tx.is_closed() {
                let resp = match client.get(&poll_url).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        crate::log_error!("Poll request failed: {}", e);
                        consecutive_errors += 1;
                        if consecutive_errors >= 3 {
                            break;
                        }
                        tokio::time::sleep(retry_pause).await;
                        continue;
                    }
                };

                let status = resp.status().as_u16();
                if status == 404 || status == 410 {
                    crate::log_info!("Polling session {} expired", poll_url);
                    break;
                }
                if !resp.status().is_success() {
                    crate::log_error!("Poll returned HTTP {}", status);
                    consecutive_errors += 1;
                    if consecutive_errors >= 3 {
                        break;
                    }
                    tokio::time::sleep(retry_pause).await;
                    continue;
                }

                consecutive_errors = 0;
                match resp.json::<Vec<WireEvent>>().await {
                    Ok(events) => {
                        for event in events {
                            if inbound_tx.unbounded_send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => crate::log_error!("Failed to parse poll batch: {}", e),
                }
            }
        });

        // Send task
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.next().await {
                match client.post(&session_url).json(&event).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => {
                        crate::log_error!("Poll send of '{}' returned HTTP {}", event.event, resp.status())
                    }
                    Err(e) => crate::log_error!("Poll send of '{}' failed: {}", event.event, e),
                }
            }
        });

        Ok(TransportLink {
            transport: self.name(),
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Try `primary`, fall back to `fallback` when it cannot connect.
///
/// The choice is made per connection attempt, so a reconnect retries the
/// primary transport first.
pub struct FallbackTransport {
    primary: Box<dyn Transport>,
    fallback: Box<dyn Transport>,
}

impl FallbackTransport {
    pub fn new(primary: Box<dyn Transport>, fallback: Box<dyn Transport>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let primary_err = match self.primary.connect().await {
            Ok(link) => return Ok(link),
            Err(e) => e,
        };
        crate::log_warn!(
            "{} transport unavailable ({}), falling back to {}",
            self.primary.name(),
            primary_err,
            self.fallback.name()
        );

        self.fallback.connect().await.map_err(|fallback_err| {
            TransportError::Exhausted(format!("{primary_err}; {fallback_err}"))
        })
    }
}
