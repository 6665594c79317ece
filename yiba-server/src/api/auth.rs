//! Actor-resolution middleware and session endpoints
//!
//! Protected routes run behind [`actor_middleware`], which resolves an
//! [`Actor`] from a bearer token / session cookie, or from the
//! development-only bypass header when the config enables it. The resolved
//! actor is placed in request extensions for handlers.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use yiba_common::actor::{
    create_session, delete_session, hash_token, resolve_bypass, resolve_session,
};
use yiba_common::{Error, Result};

use crate::AppState;

/// Development bypass header: `ROLE:user_uuid[:institution_uuid]`
const DEV_ACTOR_HEADER: &str = "x-dev-actor";

/// Extract the session token from `Authorization: Bearer` or the
/// `session` cookie
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(token) = pair.strip_prefix("session=") {
            return Some(token.to_string());
        }
    }
    None
}

/// Resolve the caller and stash the Actor in request extensions.
///
/// Resolution order: dev bypass header (only when enabled in config),
/// then session token. Session projections are memoized in the short-TTL
/// actor cache keyed by token hash.
pub async fn actor_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    if state.config.server.dev_bypass {
        if let Some(header) = request.headers().get(DEV_ACTOR_HEADER) {
            let header = header
                .to_str()
                .map_err(|_| Error::Unauthenticated("malformed bypass header".to_string()))?;
            let actor = resolve_bypass(header)?;
            request.extensions_mut().insert(actor);
            return Ok(next.run(request).await);
        }
    }

    let token = session_token(request.headers())
        .ok_or_else(|| Error::Unauthenticated("missing session token".to_string()))?;

    let cache_key = hash_token(&token);
    let actor = match state.actors.get(&cache_key) {
        Some(actor) => actor,
        None => {
            let actor = resolve_session(&state.db, &token).await?;
            state.actors.insert(cache_key, actor.clone());
            actor
        }
    };

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

// =============================================================================
// Session endpoints
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub role: String,
    pub institution_id: Option<String>,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(Error::InvalidInput("email and password required".to_string()));
    }

    let row: Option<(String, String, String, Option<String>)> = sqlx::query_as(
        "SELECT id, password_hash, role, institution_id FROM users WHERE email = ?",
    )
    .bind(&body.email)
    .fetch_optional(&state.db)
    .await?;

    // Same error for unknown email and wrong password
    let (user_id, password_hash, role, institution_id) =
        row.ok_or_else(|| Error::Unauthenticated("invalid credentials".to_string()))?;

    if !crate::api::users::verify_password(&body.password, &password_hash) {
        return Err(Error::Unauthenticated("invalid credentials".to_string()));
    }

    let user_id = crate::api::parse_id(&user_id)?;
    let token = create_session(&state.db, user_id, state.config.server.session_ttl_seconds).await?;

    Ok(Json(LoginResponse {
        token,
        user_id: user_id.to_string(),
        role,
        institution_id,
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    if let Some(token) = session_token(&headers) {
        delete_session(&state.db, &token).await?;
        state.actors.remove(&hash_token(&token));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}
