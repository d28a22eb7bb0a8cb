//! Connection lifecycle state.

use thiserror::Error;

/// Connection state for the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport is open; the registration handshake has not been sent yet.
    Connected,
    /// Handshake sent; the server routes domain events to this channel.
    Registered,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    /// Transport is open, whether or not the handshake went out yet.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Registered)
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, ConnectionState::Registered)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }
}

/// Errors returned synchronously by the connection manager.
///
/// Transport failures never show up here; they drive the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection manager has not been initialized")]
    NotInitialized,
    #[error("connection loop has stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Registered.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connected.is_registered());
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_connecting());
        assert!(!ConnectionState::Disconnected.is_connecting());
        assert!(ConnectionState::Failed { reason: "x".into() }.is_failed());
    }
}
