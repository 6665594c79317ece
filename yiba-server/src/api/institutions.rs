//! Institution administration
//!
//! Creation and edits are platform-level operations; institution actors
//! can read their own record, regulators can read all of them.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::api::types::{PageQuery, Paginated, PAGE_SIZE};
use yiba_common::audit::{audit_value, ChangeType};
use yiba_common::db::models::Institution;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Capability, Error, Result};

use crate::api::{check_read_scope, parse_id};
use crate::AppState;

const VALID_STATUSES: [&str; 3] = ["ACTIVE", "SUSPENDED", "DEREGISTERED"];

/// GET /api/institutions
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Institution>>> {
    if actor.role.is_institution_scoped() {
        // Institution actors see only their own record
        let inst = actor
            .institution_id
            .ok_or_else(|| Error::Forbidden("no institution scope".to_string()))?;
        let rows: Vec<Institution> = sqlx::query_as("SELECT * FROM institutions WHERE id = ?")
            .bind(inst.to_string())
            .fetch_all(&state.db)
            .await?;
        let total = rows.len() as i64;
        return Ok(Json(Paginated::new(total, 1, rows)));
    }

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM institutions")
        .fetch_one(&state.db)
        .await?;
    let rows: Vec<Institution> =
        sqlx::query_as("SELECT * FROM institutions ORDER BY name LIMIT ? OFFSET ?")
            .bind(PAGE_SIZE)
            .bind(Paginated::<Institution>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;

    Ok(Json(Paginated::new(total, query.page, rows)))
}

/// GET /api/institutions/:id
pub async fn get_one(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<Institution>> {
    let id = parse_id(&id)?;
    let row: Option<Institution> = sqlx::query_as("SELECT * FROM institutions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    let institution = row.ok_or_else(|| Error::NotFound(format!("institution {}", id)))?;
    check_read_scope(&actor, &institution.id)?;
    Ok(Json(institution))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateInstitutionRequest {
    pub name: String,
    pub accreditation_number: String,
}

/// POST /api/institutions
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateInstitutionRequest>,
) -> Result<Json<Institution>> {
    actor.require(Capability::ManageInstitutions)?;
    if body.name.trim().is_empty() || body.accreditation_number.trim().is_empty() {
        return Err(Error::InvalidInput(
            "name and accreditation_number required".to_string(),
        ));
    }

    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();

    // Institutions are platform-owned: no tenant on the spec, so only the
    // capability gate applies
    let spec = MutationSpec::new("INSTITUTION", ChangeType::Create)
        .entity_id(id.to_string())
        .new_value(audit_value(&serde_json::json!({
            "name": body.name,
            "accreditation_number": body.accreditation_number,
        })));

    let institution = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO institutions (id, name, accreditation_number, status,
                                               created_at, updated_at)
                     VALUES (?, ?, ?, 'ACTIVE', ?, ?)",
                )
                .bind(id.to_string())
                .bind(&body.name)
                .bind(&body.accreditation_number)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;

                let row: Institution = sqlx::query_as("SELECT * FROM institutions WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(institution))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateInstitutionRequest {
    pub name: Option<String>,
    pub accreditation_number: Option<String>,
    pub status: Option<String>,
}

/// PATCH /api/institutions/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(body): Json<UpdateInstitutionRequest>,
) -> Result<Json<Institution>> {
    actor.require(Capability::ManageInstitutions)?;
    let id = parse_id(&id)?;

    if let Some(status) = &body.status {
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(Error::InvalidInput(format!("invalid status: {}", status)));
        }
    }

    let current: Option<Institution> = sqlx::query_as("SELECT * FROM institutions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    let current = current.ok_or_else(|| Error::NotFound(format!("institution {}", id)))?;

    let name = body.name.clone().unwrap_or_else(|| current.name.clone());
    let accreditation_number = body
        .accreditation_number
        .clone()
        .unwrap_or_else(|| current.accreditation_number.clone());
    let status = body.status.clone().unwrap_or_else(|| current.status.clone());
    let now = Utc::now().to_rfc3339();

    let spec = MutationSpec::new("INSTITUTION", ChangeType::Update)
        .entity_id(id.to_string())
        .old_value(audit_value(&current))
        .new_value(audit_value(&serde_json::json!({
            "name": name,
            "accreditation_number": accreditation_number,
            "status": status,
        })));

    let institution = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "UPDATE institutions
                     SET name = ?, accreditation_number = ?, status = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&name)
                .bind(&accreditation_number)
                .bind(&status)
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;

                let row: Institution = sqlx::query_as("SELECT * FROM institutions WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(institution))
}
