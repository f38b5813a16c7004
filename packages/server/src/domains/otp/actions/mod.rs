//! OTP actions - issue, verify and sweep

mod issue_otp;
mod sweep_expired;
mod verify_otp;

pub use issue_otp::{OpenSend, OpenSendRequest};
