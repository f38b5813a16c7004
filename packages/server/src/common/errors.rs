use thiserror::Error;

use crate::domains::sessions::SessionStatus;

/// Errors surfaced by the session and OTP core to the HTTP boundary
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Messaging session not ready. Current status: {0}")]
    SessionNotReady(SessionStatus),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid phone number: {0}")]
    InvalidAddress(String),

    #[error("Invalid OTP code")]
    InvalidCode,

    #[error("OTP code has expired")]
    Expired,

    #[error("Timed out waiting for pairing")]
    PairingTimeout,

    #[error("Transport error: {0}")]
    Transport(anyhow::Error),

    /// Cleanup only: the resource is still held open. Retried, never surfaced.
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
