//! Application setup and server configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::middleware::jwt_auth_middleware;
use crate::server::routes::{
    generate_session_handler, get_session_handler, health_handler, open_send_otp_handler,
    session_status_handler, tenant_send_otp_handler, verify_otp_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
}

/// Routes plus auth and shared state, without the network-facing layers.
pub fn build_router(deps: Arc<ServerDeps>) -> Router {
    let jwt_service = deps.jwt_service.clone();
    let app_state = AppState { deps };

    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_service.clone(), req, next)
        }))
        .layer(Extension(app_state))
}

fn api_routes() -> Router {
    Router::new()
        // Tenant routes (bearer token)
        .route("/session", get(get_session_handler))
        .route("/session/generate", post(generate_session_handler))
        .route("/session/send-otp", post(tenant_send_otp_handler))
        // Public routes (session id)
        .route("/status", post(session_status_handler))
        .route("/send-otp", post(open_send_otp_handler))
        .route("/verify-otp", post(verify_otp_handler))
}

/// Build the Axum application: routes, rate limiting, CORS and tracing
pub fn build_app(deps: Arc<ServerDeps>, allowed_origins: &[String]) -> Result<Router> {
    // 10 requests/sec per IP with bursts up to 20
    let rate_limit_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .use_headers() // Extract IP from X-Forwarded-For header
            .finish()
            .context("Invalid rate limiter configuration")?,
    );
    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config,
    };

    let cors = cors_layer(allowed_origins)?;

    Ok(build_router(deps)
        .layer(rate_limit_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return Ok(cors.allow_origin(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("Invalid allowed origin: {}", o))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(cors.allow_origin(origins))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_rejects_invalid_origin() {
        assert!(cors_layer(&["http://ok.test".to_string()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
        assert!(cors_layer(&[]).is_ok());
    }
}
