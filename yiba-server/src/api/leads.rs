//! Public lead capture and staff lead listing
//!
//! Capture is the one unauthenticated write surface, so it is rate
//! limited per client address and the row is not a tracked entity: no
//! actor, no audit entry. The notification email is enqueued after the
//! insert and never blocks the response.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::api::types::{PageQuery, Paginated, PAGE_SIZE};
use yiba_common::db::models::{Lead, Setting};
use yiba_common::{Capability, Error, Result};

use crate::AppState;

/// Settings key holding the address notified of new leads
const NOTIFY_SETTING: &str = "lead_notification_address";

#[derive(Debug, serde::Deserialize)]
pub struct CaptureLeadRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    pub source: Option<String>,
}

/// Client key for rate limiting: first X-Forwarded-For hop, as set by
/// the reverse proxy. Direct connections share one bucket.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "direct".to_string())
}

/// POST /api/public/leads
pub async fn capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CaptureLeadRequest>,
) -> Result<Json<serde_json::Value>> {
    state.lead_limiter.check(&client_key(&headers))?;

    if body.name.trim().is_empty() {
        return Err(Error::InvalidInput("name required".to_string()));
    }
    if !body.email.contains('@') {
        return Err(Error::InvalidInput("invalid email".to_string()));
    }
    if body.message.trim().is_empty() {
        return Err(Error::InvalidInput("message required".to_string()));
    }

    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    let source = body.source.as_deref().unwrap_or("website");

    sqlx::query(
        "INSERT INTO leads (id, name, email, message, source, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(body.name.trim())
    .bind(&body.email)
    .bind(body.message.trim())
    .bind(source)
    .bind(&now)
    .execute(&state.db)
    .await?;

    // Best-effort notification; failure only logs
    if let Err(e) = enqueue_notification(&state, &body, &now).await {
        warn!("lead notification enqueue failed: {}", e);
    }

    Ok(Json(serde_json::json!({ "ok": true, "id": id.to_string() })))
}

async fn enqueue_notification(
    state: &AppState,
    lead: &CaptureLeadRequest,
    now: &str,
) -> Result<()> {
    let notify: Option<Setting> = sqlx::query_as("SELECT * FROM settings WHERE key = ?")
        .bind(NOTIFY_SETTING)
        .fetch_optional(&state.db)
        .await?;
    let Some(setting) = notify else {
        return Ok(());
    };
    let to_address = setting.value;

    let body = format!(
        "New lead from {} <{}>:\n\n{}",
        lead.name.trim(),
        lead.email,
        lead.message.trim()
    );
    sqlx::query(
        "INSERT INTO email_queue
             (id, campaign_id, to_address, subject, body, status,
              attempts, created_at, updated_at)
         VALUES (?, NULL, ?, 'New lead received', ?, 'PENDING', 0, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&to_address)
    .bind(&body)
    .bind(now)
    .bind(now)
    .execute(&state.db)
    .await?;
    Ok(())
}

/// GET /api/leads
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Lead>>> {
    actor.require(Capability::ViewLeads)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(&state.db)
        .await?;
    let rows: Vec<Lead> =
        sqlx::query_as("SELECT * FROM leads ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(PAGE_SIZE)
            .bind(Paginated::<Lead>::offset(total, query.page))
            .fetch_all(&state.db)
            .await?;

    Ok(Json(Paginated::new(total, query.page, rows)))
}
