//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod retry;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use deps::{BridgeTransport, PostgresOtpStore, PostgresSessionStore, ServerDeps};
pub use retry::{RetryError, RetryPolicy};
pub use scheduled_tasks::start_scheduler;
pub use test_dependencies::TestDependencies;
pub use traits::*;
