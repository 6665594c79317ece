//! Readiness records and the QCTO review workflow
//!
//! Lifecycle: DRAFT -> SUBMITTED -> UNDER_REVIEW -> APPROVED | REJECTED.
//! Submission is an institution action; review transitions are regulator
//! review operations on institution-owned data and go through the wrapper
//! with the explicit review flag.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::api::types::{PageQuery, Paginated, PAGE_SIZE};
use yiba_common::audit::{audit_value, ChangeType};
use yiba_common::db::models::ReadinessRecord;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Capability, Error, Result};

use crate::api::{check_read_scope, listing_scope, parse_id};
use crate::AppState;

async fn fetch_record(state: &AppState, id: Uuid) -> Result<ReadinessRecord> {
    let row: Option<ReadinessRecord> =
        sqlx::query_as("SELECT * FROM readiness_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&state.db)
            .await?;
    row.ok_or_else(|| Error::NotFound(format!("readiness record {}", id)))
}

/// GET /api/readiness
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<ReadinessRecord>>> {
    let scope = listing_scope(&actor)?;

    let (total, rows): (i64, Vec<ReadinessRecord>) = match &scope {
        Some(inst) => {
            let total = sqlx::query_scalar(
                "SELECT COUNT(*) FROM readiness_records WHERE institution_id = ?",
            )
            .bind(inst)
            .fetch_one(&state.db)
            .await?;
            let rows = sqlx::query_as(
                "SELECT * FROM readiness_records WHERE institution_id = ?
                 ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(inst)
            .bind(PAGE_SIZE)
            .bind(Paginated::<ReadinessRecord>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;
            (total, rows)
        }
        None => {
            let total = sqlx::query_scalar("SELECT COUNT(*) FROM readiness_records")
                .fetch_one(&state.db)
                .await?;
            let rows = sqlx::query_as(
                "SELECT * FROM readiness_records ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(PAGE_SIZE)
            .bind(Paginated::<ReadinessRecord>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;
            (total, rows)
        }
    };

    Ok(Json(Paginated::new(total, query.page, rows)))
}

/// GET /api/readiness/:id
pub async fn get_one(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<ReadinessRecord>> {
    let record = fetch_record(&state, parse_id(&id)?).await?;
    check_read_scope(&actor, &record.institution_id)?;
    Ok(Json(record))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateReadinessRequest {
    pub qualification: String,
    pub learner_id: Option<String>,
}

/// POST /api/readiness
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateReadinessRequest>,
) -> Result<Json<ReadinessRecord>> {
    actor.require(Capability::SubmitReadiness)?;
    if body.qualification.trim().is_empty() {
        return Err(Error::InvalidInput("qualification required".to_string()));
    }
    let institution_id = actor
        .institution_id
        .ok_or_else(|| Error::Forbidden("no institution scope".to_string()))?;
    let learner_id = match body.learner_id.as_deref() {
        Some(id) => Some(parse_id(id)?),
        None => None,
    };

    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();

    let spec = MutationSpec::new("READINESS_RECORD", ChangeType::Create)
        .entity_id(id.to_string())
        .institution(institution_id)
        .new_value(audit_value(&serde_json::json!({
            "qualification": body.qualification,
            "status": "DRAFT",
        })));

    let record = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO readiness_records
                         (id, institution_id, learner_id, qualification, status,
                          created_at, updated_at)
                     VALUES (?, ?, ?, ?, 'DRAFT', ?, ?)",
                )
                .bind(id.to_string())
                .bind(institution_id.to_string())
                .bind(learner_id.map(|u| u.to_string()))
                .bind(&body.qualification)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;

                let row: ReadinessRecord =
                    sqlx::query_as("SELECT * FROM readiness_records WHERE id = ?")
                        .bind(id.to_string())
                        .fetch_one(&mut *conn)
                        .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(record))
}

/// POST /api/readiness/:id/submit
pub async fn submit(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<ReadinessRecord>> {
    actor.require(Capability::SubmitReadiness)?;
    let id = parse_id(&id)?;
    let current = fetch_record(&state, id).await?;
    let institution_id = parse_id(&current.institution_id)?;

    if current.status != "DRAFT" {
        return Err(Error::InvalidInput(format!(
            "cannot submit a record in status {}",
            current.status
        )));
    }

    let now = Utc::now().to_rfc3339();
    let spec = MutationSpec::new("READINESS_RECORD", ChangeType::Update)
        .entity_id(id.to_string())
        .institution(institution_id)
        .field("status")
        .old_value(audit_value(&current.status))
        .new_value(audit_value(&"SUBMITTED"));

    let record = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "UPDATE readiness_records
                     SET status = 'SUBMITTED', submitted_at = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&now)
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;

                let row: ReadinessRecord =
                    sqlx::query_as("SELECT * FROM readiness_records WHERE id = ?")
                        .bind(id.to_string())
                        .fetch_one(&mut *conn)
                        .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(record))
}

#[derive(Debug, serde::Deserialize)]
pub struct ReviewRequest {
    /// "under_review", "approve", or "reject"
    pub decision: String,
    pub comment: Option<String>,
}

/// POST /api/readiness/:id/review
///
/// Regulator review operation on institution-owned data: requires the
/// ReviewSubmissions capability and passes the explicit review flag.
pub async fn review(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<ReadinessRecord>> {
    actor.require(Capability::ReviewSubmissions)?;
    let id = parse_id(&id)?;
    let current = fetch_record(&state, id).await?;
    let institution_id = parse_id(&current.institution_id)?;

    let new_status = match body.decision.as_str() {
        "under_review" => "UNDER_REVIEW",
        "approve" => "APPROVED",
        "reject" => "REJECTED",
        other => {
            return Err(Error::InvalidInput(format!("invalid decision: {}", other)));
        }
    };

    if !matches!(current.status.as_str(), "SUBMITTED" | "UNDER_REVIEW") {
        return Err(Error::InvalidInput(format!(
            "cannot review a record in status {}",
            current.status
        )));
    }

    let now = Utc::now().to_rfc3339();
    let comment = body.comment.clone();

    let mut spec = MutationSpec::new("READINESS_RECORD", ChangeType::Update)
        .entity_id(id.to_string())
        .institution(institution_id)
        .field("status")
        .old_value(audit_value(&current.status))
        .new_value(audit_value(&new_status))
        .review_operation();
    if let Some(comment) = &body.comment {
        spec = spec.reason(comment.clone());
    }

    let record = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "UPDATE readiness_records
                     SET status = ?, reviewed_at = ?, reviewer_comment = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(new_status)
                .bind(&now)
                .bind(&comment)
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;

                let row: ReadinessRecord =
                    sqlx::query_as("SELECT * FROM readiness_records WHERE id = ?")
                        .bind(id.to_string())
                        .fetch_one(&mut *conn)
                        .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(record))
}
