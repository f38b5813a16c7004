use crate::domains::auth::{JwtService, Role};
use axum::{middleware::Next, response::Response};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Authenticated tenant information from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub tenant_id: Uuid,
    pub username: String,
    /// Informational; routes authorize on `tenant_id` alone
    pub role: Role,
}

/// JWT authentication middleware
///
/// Extracts JWT token from Authorization header, verifies it, and adds AuthUser to request extensions.
/// If no token or invalid token, request continues without AuthUser; tenant routes reject it.
pub async fn jwt_auth_middleware(
    jwt_service: Arc<JwtService>,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let auth_user = extract_auth_user(&request, &jwt_service);

    if let Some(user) = auth_user {
        debug!("Authenticated tenant: {} ({})", user.tenant_id, user.role);
        request.extensions_mut().insert(user);
    } else {
        debug!("No valid authentication token");
    }

    next.run(request).await
}

/// Extract and verify JWT token from request
fn extract_auth_user(
    request: &axum::http::Request<axum::body::Body>,
    jwt_service: &JwtService,
) -> Option<AuthUser> {
    let auth_header = request.headers().get("authorization")?;
    let auth_str = auth_header.to_str().ok()?;

    // Handle both "Bearer <token>" and raw token
    let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str);

    let claims = jwt_service.verify_token(token).ok()?;

    Some(AuthUser {
        tenant_id: claims.tenant_id,
        username: claims.username,
        role: claims.role,
    })
}
