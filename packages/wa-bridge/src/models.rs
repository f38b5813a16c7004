use serde::{Deserialize, Serialize};

/// Event emitted by the bridge for one session, in the order the protocol
/// client produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Raw pairing payload that must be rendered as a scannable code
    Qr { payload: String },
    Authenticated,
    Ready,
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

impl BridgeEvent {
    /// Terminal events end the bridge-side session; no further events follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeEvent::AuthFailure { .. } | BridgeEvent::Disconnected { .. }
        )
    }
}

/// Connection state reported by the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Opening,
    Pairing,
    Unpaired,
    UnpairedIdle,
    Unlaunched,
    Conflict,
    Timeout,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StateResponse {
    pub state: Option<ConnectionState>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartRequest<'a> {
    pub data_path: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendRequest<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendResponse {
    pub sent: bool,
}
