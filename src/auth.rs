//! # Authentication
//!
//! Bearer session authentication for the dashboard API. Every session token is bound to
//! exactly one tenant; handlers read that tenant from [`AuthenticatedTenant`] and never
//! from the path or body.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::models::{Collection, CollectionPath, TenantId};
use crate::server::AppState;

/// Tenant resolved from the request's session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedTenant(pub TenantId);

impl AuthenticatedTenant {
    pub fn tenant(&self) -> &TenantId {
        &self.0
    }

    /// Collection path scoped to the authenticated tenant.
    pub fn collection(&self, collection: Collection) -> CollectionPath {
        self.0.collection(collection)
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the bearer session token and attaches its tenant to the request.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let tenant = resolve_session(&config, token)?;
    tracing::debug!(tenant_id = %tenant, "Authenticated session");

    request
        .extensions_mut()
        .insert(AuthenticatedTenant(tenant));
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn resolve_session(config: &AppConfig, token: &str) -> Result<TenantId, ApiError> {
    // Compare against every configured token so timing does not reveal the match position.
    let mut matched = None;
    for session in &config.session_tokens {
        let equal: bool = token.as_bytes().ct_eq(session.token.as_bytes()).into();
        if equal && matched.is_none() {
            matched = Some(session.tenant.clone());
        }
    }
    matched.ok_or_else(|| unauthorized(Some("Invalid session token")))
}

impl<S> FromRequestParts<S> for AuthenticatedTenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedTenant>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}
