// Client for the messaging bridge sidecar.
//
// The bridge runs the actual messaging protocol client (one per session) and
// exposes it over a small HTTP API. Pairing data for each session lives under
// its own directory, passed in when the session is started.

use std::time::Duration;

pub mod models;
use reqwest::{Client, StatusCode};
use thiserror::Error;

pub use crate::models::{BridgeEvent, ConnectionState};
use crate::models::{SendRequest, SendResponse, StartRequest, StateResponse};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bridge returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("session {0} is not known to the bridge")]
    UnknownSession(String),
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub base_url: String,
    /// How long a single event poll may be held open by the bridge
    pub poll_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct BridgeService {
    options: BridgeOptions,
    client: Client,
}

impl BridgeService {
    pub fn new(options: BridgeOptions) -> Self {
        Self {
            options,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    /// Launch the protocol client for a session. Pairing events follow on
    /// the session's event feed.
    pub async fn start_session(&self, session_id: &str, data_path: &str) -> Result<(), BridgeError> {
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/start", session_id)))
            .json(&StartRequest { data_path })
            .send()
            .await?;

        check_status(session_id, response).await.map(|_| ())
    }

    /// Long-poll the event feed. Returns an empty list when nothing happened
    /// within the wait window.
    pub async fn poll_events(&self, session_id: &str) -> Result<Vec<BridgeEvent>, BridgeError> {
        let wait_ms = self.options.poll_wait.as_millis().to_string();
        let response = self
            .client
            .get(self.url(&format!("/sessions/{}/events", session_id)))
            .query(&[("wait_ms", wait_ms.as_str())])
            .timeout(self.options.poll_wait + Duration::from_secs(5))
            .send()
            .await?;

        let response = check_status(session_id, response).await?;
        Ok(response.json::<Vec<BridgeEvent>>().await?)
    }

    /// Current connection state. `None` means the client has not reported
    /// one yet (still launching).
    pub async fn get_state(&self, session_id: &str) -> Result<Option<ConnectionState>, BridgeError> {
        let response = self
            .client
            .get(self.url(&format!("/sessions/{}/state", session_id)))
            .send()
            .await?;

        let response = check_status(session_id, response).await?;
        Ok(response.json::<StateResponse>().await?.state)
    }

    /// Send a text message to a normalized phone number.
    pub async fn send_message(
        &self,
        session_id: &str,
        phone_number: &str,
        text: &str,
    ) -> Result<bool, BridgeError> {
        let chat_id = chat_id(phone_number);
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/messages", session_id)))
            .json(&SendRequest {
                chat_id: &chat_id,
                text,
            })
            .send()
            .await?;

        let response = check_status(session_id, response).await?;
        Ok(response.json::<SendResponse>().await?.sent)
    }

    /// Tear down the protocol client. Unknown sessions are already gone.
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), BridgeError> {
        let response = self
            .client
            .delete(self.url(&format!("/sessions/{}", session_id)))
            .send()
            .await?;

        match check_status(session_id, response).await {
            Ok(_) | Err(BridgeError::UnknownSession(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Protocol chat id for a normalized phone number.
pub fn chat_id(phone_number: &str) -> String {
    format!("{}@c.us", phone_number)
}

async fn check_status(
    session_id: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, BridgeError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(BridgeError::UnknownSession(session_id.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BridgeError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
