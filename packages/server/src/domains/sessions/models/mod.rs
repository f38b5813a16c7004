pub mod session;

pub use session::{MessagingSession, SessionStatus, SessionUpdate};
