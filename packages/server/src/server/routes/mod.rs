// HTTP routes
pub mod health;
pub mod open_api;
pub mod sessions;

pub use health::*;
pub use open_api::*;
pub use sessions::*;
