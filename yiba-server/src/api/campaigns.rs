//! Email campaigns and the suppression list
//!
//! Queueing a campaign inserts one email_queue row per recipient and
//! moves the campaign DRAFT -> QUEUED in the same audited transaction.
//! Suppression is applied at drain time by yiba-mailer, so suppressing an
//! address also covers mail that is already queued.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::api::types::{PageQuery, Paginated, PAGE_SIZE};
use yiba_common::audit::{audit_value, ChangeType};
use yiba_common::db::models::Campaign;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Capability, Error, Result};

use crate::api::parse_id;
use crate::AppState;

/// GET /api/campaigns
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Campaign>>> {
    actor.require(Capability::ManageCampaigns)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM campaigns")
        .fetch_one(&state.db)
        .await?;
    let rows: Vec<Campaign> =
        sqlx::query_as("SELECT * FROM campaigns ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(PAGE_SIZE)
            .bind(Paginated::<Campaign>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;

    Ok(Json(Paginated::new(total, query.page, rows)))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub subject: String,
    pub body: String,
}

/// POST /api/campaigns
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<Json<Campaign>> {
    actor.require(Capability::ManageCampaigns)?;
    if body.name.trim().is_empty() || body.subject.trim().is_empty() {
        return Err(Error::InvalidInput("name and subject required".to_string()));
    }

    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    let created_by = actor.user_id.to_string();

    let spec = MutationSpec::new("CAMPAIGN", ChangeType::Create)
        .entity_id(id.to_string())
        .new_value(audit_value(&serde_json::json!({ "name": body.name })));

    let campaign = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO campaigns (id, name, subject, body, status, created_by, created_at)
                     VALUES (?, ?, ?, ?, 'DRAFT', ?, ?)",
                )
                .bind(id.to_string())
                .bind(&body.name)
                .bind(&body.subject)
                .bind(&body.body)
                .bind(&created_by)
                .bind(&now)
                .execute(&mut *conn)
                .await?;

                let row: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(campaign))
}

#[derive(Debug, serde::Deserialize)]
pub struct QueueCampaignRequest {
    pub recipients: Vec<String>,
}

/// POST /api/campaigns/:id/queue
pub async fn queue(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(body): Json<QueueCampaignRequest>,
) -> Result<Json<serde_json::Value>> {
    actor.require(Capability::ManageCampaigns)?;
    let id = parse_id(&id)?;

    if body.recipients.is_empty() {
        return Err(Error::InvalidInput("recipients required".to_string()));
    }
    for address in &body.recipients {
        if !address.contains('@') {
            return Err(Error::InvalidInput(format!("invalid recipient: {}", address)));
        }
    }

    let current: Option<Campaign> = sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    let current = current.ok_or_else(|| Error::NotFound(format!("campaign {}", id)))?;
    if current.status != "DRAFT" {
        return Err(Error::InvalidInput(format!(
            "campaign already {}",
            current.status
        )));
    }

    let recipients = body.recipients.clone();
    let queued = recipients.len();
    let subject = current.subject.clone();
    let mail_body = current.body.clone();
    let now = Utc::now().to_rfc3339();

    let spec = MutationSpec::new("CAMPAIGN", ChangeType::Update)
        .entity_id(id.to_string())
        .field("status")
        .old_value(audit_value(&current.status))
        .new_value(audit_value(&"QUEUED"))
        .reason(format!("queued {} recipients", queued));

    mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                for address in &recipients {
                    sqlx::query(
                        "INSERT INTO email_queue
                             (id, campaign_id, to_address, subject, body, status,
                              attempts, created_at, updated_at)
                         VALUES (?, ?, ?, ?, ?, 'PENDING', 0, ?, ?)",
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(id.to_string())
                    .bind(address)
                    .bind(&subject)
                    .bind(&mail_body)
                    .bind(&now)
                    .bind(&now)
                    .execute(&mut *conn)
                    .await?;
                }

                sqlx::query("UPDATE campaigns SET status = 'QUEUED' WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await?;

                Ok(serde_json::json!({ "id": id.to_string(), "queued": queued }))
            })
        },
    )
    .await?;

    Ok(Json(serde_json::json!({ "ok": true, "queued": queued })))
}

// =============================================================================
// Suppression list
// =============================================================================

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
pub struct Suppression {
    pub address: String,
    pub reason: String,
    pub created_at: String,
}

/// GET /api/suppressions
pub async fn list_suppressions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Suppression>>> {
    actor.require(Capability::ManageCampaigns)?;
    let rows: Vec<Suppression> =
        sqlx::query_as("SELECT * FROM email_suppressions ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(rows))
}

#[derive(Debug, serde::Deserialize)]
pub struct SuppressionRequest {
    pub address: String,
    pub reason: String,
}

/// POST /api/suppressions
pub async fn add_suppression(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<SuppressionRequest>,
) -> Result<Json<serde_json::Value>> {
    actor.require(Capability::ManageCampaigns)?;
    if !body.address.contains('@') {
        return Err(Error::InvalidInput("invalid address".to_string()));
    }

    let address = body.address.to_lowercase();
    let reason = body.reason.clone();
    let now = Utc::now().to_rfc3339();

    let spec = MutationSpec::new("EMAIL_SUPPRESSION", ChangeType::Create)
        .entity_id(address.clone())
        .new_value(audit_value(&serde_json::json!({ "reason": reason })));

    mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT OR REPLACE INTO email_suppressions (address, reason, created_at)
                     VALUES (?, ?, ?)",
                )
                .bind(&address)
                .bind(&reason)
                .bind(&now)
                .execute(&mut *conn)
                .await?;
                Ok(serde_json::json!({ "address": address }))
            })
        },
    )
    .await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// DELETE /api/suppressions/:address
pub async fn remove_suppression(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>> {
    actor.require(Capability::ManageCampaigns)?;
    let address = address.to_lowercase();

    let spec = MutationSpec::new("EMAIL_SUPPRESSION", ChangeType::Delete)
        .entity_id(address.clone());

    mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query("DELETE FROM email_suppressions WHERE address = ?")
                    .bind(&address)
                    .execute(&mut *conn)
                    .await?;
                Ok(serde_json::json!({ "address": address }))
            })
        },
    )
    .await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}
