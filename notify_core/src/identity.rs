//! # Identity Resolution
//!
//! The upgrade endpoint never authenticates anyone itself. An authentication
//! layer in front of it resolves the session and stores an
//! [`AuthenticatedUser`] in the request extensions; that value is the
//! canonical identity.
//!
//! Precedence, in [`resolve_identity`]:
//!
//! 1. the request-scoped [`AuthenticatedUser`], if present,
//! 2. otherwise the legacy `user_id` path/query parameter, if legacy identity
//!    is enabled,
//! 3. otherwise the request is refused with `401 Unauthorized`.
//!
//! A legacy parameter never overrides a context identity.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;

use crate::error::IdentityError;

/// A user id resolved by the authentication layer. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(String);

impl AuthenticatedUser {
    pub fn new(user_id: impl Into<String>) -> Option<Self> {
        let user_id = user_id.into();
        let trimmed = user_id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(AuthenticatedUser(trimmed.to_string()))
        }
    }

    pub fn user_id(&self) -> &str {
        &self.0
    }
}

/// Extractor for the optional [`AuthenticatedUser`] request extension.
#[derive(Debug, Clone)]
pub struct ContextIdentity(pub Option<AuthenticatedUser>);

impl<S> FromRequestParts<S> for ContextIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ContextIdentity(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}

pub fn resolve_identity(
    context: Option<&AuthenticatedUser>,
    legacy: Option<&str>,
    allow_legacy: bool,
) -> Result<String, IdentityError> {
    if let Some(user) = context {
        if let Some(legacy_id) = legacy.filter(|l| *l != user.user_id()) {
            log::debug!(
                "Ignoring legacy user_id {} in favour of authenticated user {}",
                legacy_id,
                user.user_id()
            );
        }
        return Ok(user.user_id().to_string());
    }

    match legacy.map(str::trim).filter(|l| !l.is_empty()) {
        Some(_) if !allow_legacy => Err(IdentityError::LegacyIdentityDisabled),
        Some(legacy_id) => Ok(legacy_id.to_string()),
        None => Err(IdentityError::MissingIdentity),
    }
}

/// Middleware that trusts an identity header set by an authenticating
/// reverse proxy and exposes it as an [`AuthenticatedUser`] extension.
pub async fn trusted_header_identity(
    State(header): State<HeaderName>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = request
        .headers()
        .get(&header)
        .and_then(|value| value.to_str().ok())
        .and_then(AuthenticatedUser::new);

    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        log::warn!("WebSocket upgrade refused: {}", self);
        let error_type = match self {
            IdentityError::MissingIdentity => "MissingIdentity",
            IdentityError::LegacyIdentityDisabled => "LegacyIdentityDisabled",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error_type": error_type,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
