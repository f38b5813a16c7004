// OTP Gateway - API Core
//
// Issues one-time passcodes over tenant-owned messaging sessions. Each tenant
// pairs one session by scanning a code; the session lifecycle (registry,
// state machine, cleanup, health sweep) lives in domains/sessions.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
