// HTTP server setup (Axum + REST)
pub mod app;
pub mod errors;
pub mod middleware;
pub mod routes;

pub use app::*;
