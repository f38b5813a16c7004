use serde::{Deserialize, Serialize};

/// Events reported by the transport for one session, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw pairing payload, to be rendered as a scannable artifact
    PairingCode(String),
    Authenticated,
    Ready,
    AuthFailure(String),
    Disconnected(String),
}

/// Connection state as reported by the transport when queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Opening,
    Pairing,
    Unpaired,
    Unlaunched,
    Conflict,
    Unknown,
}

impl ConnectionState {
    /// The underlying client never launched or lost its pairing.
    pub fn is_dead(&self) -> bool {
        matches!(self, ConnectionState::Unpaired | ConnectionState::Unlaunched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_states() {
        assert!(ConnectionState::Unpaired.is_dead());
        assert!(ConnectionState::Unlaunched.is_dead());
        assert!(!ConnectionState::Connected.is_dead());
        assert!(!ConnectionState::Opening.is_dead());
        assert!(!ConnectionState::Unknown.is_dead());
    }
}
