//! User administration
//!
//! Institution admins manage accounts inside their own tenant; platform
//! admins manage any account. Password hashing uses Argon2id with default
//! parameters and a per-hash random salt.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::api::types::{PageQuery, Paginated, PAGE_SIZE};
use yiba_common::audit::{audit_value, ChangeType};
use yiba_common::db::models::User;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Capability, Error, Result, Role};

use crate::api::listing_scope;
use crate::AppState;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("password hash error: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Bootstrap path for the CLI: create the first platform administrator.
///
/// Runs outside the mutation wrapper because no actor exists yet; the
/// wrapper covers every request-scoped mutation.
pub async fn create_platform_admin(
    db: &SqlitePool,
    email: &str,
    password: &str,
    display_name: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, display_name, role,
                            institution_id, org_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, 'PLATFORM_ADMIN', NULL, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(hash_password(password)?)
    .bind(display_name)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;
    Ok(id)
}

/// GET /api/users
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<User>>> {
    actor.require(Capability::ManageUsers)?;
    let scope = listing_scope(&actor)?;

    let (total, rows): (i64, Vec<User>) = match &scope {
        Some(inst) => {
            let total =
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE institution_id = ?")
                    .bind(inst)
                    .fetch_one(&state.db)
                    .await?;
            let rows = sqlx::query_as(
                "SELECT * FROM users WHERE institution_id = ?
                 ORDER BY created_at LIMIT ? OFFSET ?",
            )
            .bind(inst)
            .bind(PAGE_SIZE)
            .bind(Paginated::<User>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;
            (total, rows)
        }
        None => {
            let total = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(&state.db)
                .await?;
            let rows = sqlx::query_as("SELECT * FROM users ORDER BY created_at LIMIT ? OFFSET ?")
                .bind(PAGE_SIZE)
                .bind(Paginated::<User>::offset(total, query.page))
                .fetch_all(&state.db)
                .await?;
            (total, rows)
        }
    };

    Ok(Json(Paginated::new(total, query.page, rows)))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
    pub institution_id: Option<String>,
}

/// POST /api/users
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<User>> {
    actor.require(Capability::ManageUsers)?;

    if body.email.is_empty() || !body.email.contains('@') {
        return Err(Error::InvalidInput("valid email required".to_string()));
    }
    if body.password.len() < 12 {
        return Err(Error::InvalidInput(
            "password must be at least 12 characters".to_string(),
        ));
    }
    let role = Role::parse(&body.role)?;

    // Institution admins may only create institution-scoped accounts in
    // their own tenant; tenant match itself is enforced by the wrapper.
    let target_institution = match body.institution_id.as_deref() {
        Some(id) => Some(crate::api::parse_id(id)?),
        None => None,
    };
    if actor.role == Role::InstitutionAdmin {
        if !role.is_institution_scoped() {
            return Err(Error::Forbidden(
                "institution admins may only create institution roles".to_string(),
            ));
        }
        if target_institution.is_none() {
            return Err(Error::InvalidInput("institution_id required".to_string()));
        }
    }
    if role.is_institution_scoped() && target_institution.is_none() {
        return Err(Error::InvalidInput(
            "institution_id required for institution roles".to_string(),
        ));
    }

    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    let password_hash = hash_password(&body.password)?;
    let email = body.email.clone();

    let mut spec = MutationSpec::new("USER", ChangeType::Create)
        .entity_id(id.to_string())
        .new_value(audit_value(&serde_json::json!({
            "email": email,
            "role": role.as_str(),
        })));
    if let Some(inst) = target_institution {
        spec = spec.institution(inst);
    }

    let user = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO users (id, email, password_hash, display_name, role,
                                        institution_id, org_id, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)",
                )
                .bind(id.to_string())
                .bind(&body.email)
                .bind(&password_hash)
                .bind(&body.display_name)
                .bind(role.as_str())
                .bind(target_institution.map(|u| u.to_string()))
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;

                let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(user)
            })
        },
    )
    .await?;

    Ok(Json(user))
}
