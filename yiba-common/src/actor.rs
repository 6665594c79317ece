//! Access-context resolution
//!
//! Derives the caller's identity, role, and tenant scope from a session
//! token or from the development-only bypass header. Actors are resolved
//! fresh per request; callers may memoize the projection in a short-TTL
//! cache, but nothing here caches across requests.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::roles::{role_has, Capability, Role};
use crate::{Error, Result};

/// Resolved caller identity for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    /// Tenant scope for institution roles and students
    pub institution_id: Option<Uuid>,
    /// Regulator organization scope
    pub org_id: Option<Uuid>,
}

impl Actor {
    /// Capability gate; `Forbidden` if the role lacks the capability
    pub fn require(&self, cap: Capability) -> Result<()> {
        if role_has(self.role, cap) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role {} lacks capability {:?}",
                self.role.as_str(),
                cap
            )))
        }
    }

    /// Tenant gate for institution-scoped roles; platform roles pass
    pub fn require_tenant(&self, institution_id: Uuid) -> Result<()> {
        if self.role.is_platform() {
            return Ok(());
        }
        if self.institution_id == Some(institution_id) {
            Ok(())
        } else {
            Err(Error::Forbidden("institution scope mismatch".to_string()))
        }
    }
}

/// Session tokens are stored only as SHA-256 hex digests
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a session token, persist its hash, and return the cleartext.
///
/// The cleartext is returned exactly once; only the hash survives.
pub async fn create_session(db: &SqlitePool, user_id: Uuid, ttl_seconds: i64) -> Result<String> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds);
    sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(hash_token(&token))
        .bind(user_id.to_string())
        .bind(expires_at.to_rfc3339())
        .execute(db)
        .await?;

    Ok(token)
}

/// Delete the session for a token (logout); missing sessions are a no-op
pub async fn delete_session(db: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(token))
        .execute(db)
        .await?;
    Ok(())
}

/// Resolve an Actor from a session token.
///
/// Expired sessions are treated the same as unknown tokens.
pub async fn resolve_session(db: &SqlitePool, token: &str) -> Result<Actor> {
    let row: Option<(String, String, Option<String>, Option<String>, String)> = sqlx::query_as(
        r#"
        SELECT u.id, u.role, u.institution_id, u.org_id, s.expires_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = ?
        "#,
    )
    .bind(hash_token(token))
    .fetch_optional(db)
    .await?;

    let (user_id, role, institution_id, org_id, expires_at) = match row {
        Some(row) => row,
        None => return Err(Error::Unauthenticated("unknown session".to_string())),
    };

    let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| Error::Internal(format!("bad session expiry: {}", e)))?;
    if expires_at < chrono::Utc::now() {
        return Err(Error::Unauthenticated("session expired".to_string()));
    }

    Ok(Actor {
        user_id: parse_uuid(&user_id)?,
        role: Role::parse(&role)?,
        institution_id: institution_id.as_deref().map(parse_uuid).transpose()?,
        org_id: org_id.as_deref().map(parse_uuid).transpose()?,
    })
}

/// Resolve an Actor from the development bypass header.
///
/// Format: `ROLE:user_uuid[:institution_uuid]`. The caller is responsible
/// for only invoking this when the dev-bypass config flag is enabled;
/// production deployments must leave it disabled.
pub fn resolve_bypass(header: &str) -> Result<Actor> {
    let mut parts = header.splitn(3, ':');
    let role = parts
        .next()
        .ok_or_else(|| Error::Unauthenticated("empty bypass header".to_string()))?;
    let user_id = parts
        .next()
        .ok_or_else(|| Error::Unauthenticated("bypass header missing user id".to_string()))?;
    let institution_id = parts.next();

    Ok(Actor {
        user_id: parse_uuid(user_id)?,
        role: Role::parse(role)?,
        institution_id: institution_id.map(parse_uuid).transpose()?,
        org_id: None,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::InvalidInput(format!("invalid UUID '{}': {}", s, e)))
}
