//! Learner records (institution-owned)

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::api::types::{PageQuery, Paginated, PAGE_SIZE};
use yiba_common::audit::{audit_value, ChangeType};
use yiba_common::db::models::Learner;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Capability, Error, Result};

use crate::api::{check_read_scope, listing_scope, parse_id};
use crate::AppState;

const VALID_ENROLMENT_STATUSES: [&str; 3] = ["ENROLLED", "COMPLETED", "WITHDRAWN"];

async fn fetch_learner(state: &AppState, id: Uuid) -> Result<Learner> {
    let row: Option<Learner> = sqlx::query_as("SELECT * FROM learners WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    row.ok_or_else(|| Error::NotFound(format!("learner {}", id)))
}

/// GET /api/learners
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Learner>>> {
    let scope = listing_scope(&actor)?;

    let (total, rows): (i64, Vec<Learner>) = match &scope {
        Some(inst) => {
            let total =
                sqlx::query_scalar("SELECT COUNT(*) FROM learners WHERE institution_id = ?")
                    .bind(inst)
                    .fetch_one(&state.db)
                    .await?;
            let rows = sqlx::query_as(
                "SELECT * FROM learners WHERE institution_id = ?
                 ORDER BY last_name, first_name LIMIT ? OFFSET ?",
            )
            .bind(inst)
            .bind(PAGE_SIZE)
            .bind(Paginated::<Learner>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;
            (total, rows)
        }
        None => {
            let total = sqlx::query_scalar("SELECT COUNT(*) FROM learners")
                .fetch_one(&state.db)
                .await?;
            let rows = sqlx::query_as(
                "SELECT * FROM learners ORDER BY last_name, first_name LIMIT ? OFFSET ?",
            )
            .bind(PAGE_SIZE)
            .bind(Paginated::<Learner>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;
            (total, rows)
        }
    };

    Ok(Json(Paginated::new(total, query.page, rows)))
}

/// GET /api/learners/:id
pub async fn get_one(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<Learner>> {
    let learner = fetch_learner(&state, parse_id(&id)?).await?;
    check_read_scope(&actor, &learner.institution_id)?;
    Ok(Json(learner))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateLearnerRequest {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    /// Required for platform admins; institution actors default to their
    /// own tenant
    pub institution_id: Option<String>,
}

/// POST /api/learners
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateLearnerRequest>,
) -> Result<Json<Learner>> {
    actor.require(Capability::ManageLearners)?;

    if body.first_name.trim().is_empty() || body.last_name.trim().is_empty() {
        return Err(Error::InvalidInput("first_name and last_name required".to_string()));
    }
    if body.national_id.trim().is_empty() {
        return Err(Error::InvalidInput("national_id required".to_string()));
    }

    let institution_id = match body.institution_id.as_deref() {
        Some(id) => parse_id(id)?,
        None => actor
            .institution_id
            .ok_or_else(|| Error::InvalidInput("institution_id required".to_string()))?,
    };

    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();

    let spec = MutationSpec::new("LEARNER", ChangeType::Create)
        .entity_id(id.to_string())
        .institution(institution_id)
        .new_value(audit_value(&serde_json::json!({
            "first_name": body.first_name,
            "last_name": body.last_name,
        })));

    let learner = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO learners (id, institution_id, first_name, last_name,
                                           national_id, enrolment_status, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, 'ENROLLED', ?, ?)",
                )
                .bind(id.to_string())
                .bind(institution_id.to_string())
                .bind(&body.first_name)
                .bind(&body.last_name)
                .bind(&body.national_id)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;

                let row: Learner = sqlx::query_as("SELECT * FROM learners WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(learner))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateLearnerRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub enrolment_status: Option<String>,
}

/// PATCH /api/learners/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(body): Json<UpdateLearnerRequest>,
) -> Result<Json<Learner>> {
    actor.require(Capability::ManageLearners)?;
    let id = parse_id(&id)?;

    if let Some(status) = &body.enrolment_status {
        if !VALID_ENROLMENT_STATUSES.contains(&status.as_str()) {
            return Err(Error::InvalidInput(format!(
                "invalid enrolment_status: {}",
                status
            )));
        }
    }

    let current = fetch_learner(&state, id).await?;
    let institution_id = parse_id(&current.institution_id)?;

    let first_name = body.first_name.clone().unwrap_or_else(|| current.first_name.clone());
    let last_name = body.last_name.clone().unwrap_or_else(|| current.last_name.clone());
    let enrolment_status = body
        .enrolment_status
        .clone()
        .unwrap_or_else(|| current.enrolment_status.clone());
    let now = Utc::now().to_rfc3339();

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(id.to_string())
        .institution(institution_id)
        .old_value(audit_value(&current))
        .new_value(audit_value(&serde_json::json!({
            "first_name": first_name,
            "last_name": last_name,
            "enrolment_status": enrolment_status,
        })));

    let learner = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "UPDATE learners
                     SET first_name = ?, last_name = ?, enrolment_status = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&first_name)
                .bind(&last_name)
                .bind(&enrolment_status)
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;

                let row: Learner = sqlx::query_as("SELECT * FROM learners WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(learner))
}

/// DELETE /api/learners/:id
pub async fn remove(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    actor.require(Capability::ManageLearners)?;
    let id = parse_id(&id)?;

    let current = fetch_learner(&state, id).await?;
    let institution_id = parse_id(&current.institution_id)?;

    let spec = MutationSpec::new("LEARNER", ChangeType::Delete)
        .entity_id(id.to_string())
        .institution(institution_id)
        .old_value(audit_value(&current));

    mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query("DELETE FROM learners WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await?;
                Ok(serde_json::json!({ "id": id.to_string(), "deleted": true }))
            })
        },
    )
    .await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}
