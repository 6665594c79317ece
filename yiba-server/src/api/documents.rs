//! Document upload, download, and QCTO review
//!
//! Uploads are raw request bodies; metadata travels in query parameters
//! and headers. The blob is written to the object store first, then the
//! metadata row and audit entry commit together; a failed commit leaves
//! an orphaned blob, which is logged and cleaned up best-effort.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::audit::{audit_value, ChangeType};
use yiba_common::db::models::Document;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Capability, Error, Result};

use crate::api::{check_read_scope, parse_id};
use crate::AppState;

async fn fetch_document(state: &AppState, id: Uuid) -> Result<Document> {
    let row: Option<Document> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    row.ok_or_else(|| Error::NotFound(format!("document {}", id)))
}

#[derive(Debug, serde::Deserialize)]
pub struct UploadQuery {
    pub file_name: String,
    pub readiness_record_id: Option<String>,
}

/// POST /api/documents
pub async fn upload(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Document>> {
    actor.require(Capability::UploadDocuments)?;
    let institution_id = actor
        .institution_id
        .ok_or_else(|| Error::Forbidden("no institution scope".to_string()))?;

    if query.file_name.trim().is_empty() || query.file_name.contains('/') {
        return Err(Error::InvalidInput("invalid file_name".to_string()));
    }
    if body.is_empty() {
        return Err(Error::InvalidInput("empty upload".to_string()));
    }
    if body.len() > state.config.server.max_upload_bytes {
        return Err(Error::InvalidInput(format!(
            "upload exceeds {} bytes",
            state.config.server.max_upload_bytes
        )));
    }

    let readiness_record_id = match query.readiness_record_id.as_deref() {
        Some(id) => Some(parse_id(id)?),
        None => None,
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let id = Uuid::new_v4();
    let storage_key = format!("{}/{}/{}", institution_id, id, query.file_name);

    // Blob first; the metadata transaction follows
    state.storage.put(&storage_key, &body).await?;

    let now = Utc::now().to_rfc3339();
    let size_bytes = body.len() as i64;
    let file_name = query.file_name.clone();
    let uploaded_by = actor.user_id.to_string();
    let key_for_row = storage_key.clone();

    let spec = MutationSpec::new("DOCUMENT", ChangeType::Create)
        .entity_id(id.to_string())
        .institution(institution_id)
        .new_value(audit_value(&serde_json::json!({
            "file_name": file_name,
            "size_bytes": size_bytes,
        })));

    let result = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO documents
                         (id, institution_id, readiness_record_id, file_name, storage_key,
                          content_type, size_bytes, review_status, uploaded_by, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?)",
                )
                .bind(id.to_string())
                .bind(institution_id.to_string())
                .bind(readiness_record_id.map(|u| u.to_string()))
                .bind(&file_name)
                .bind(&key_for_row)
                .bind(&content_type)
                .bind(size_bytes)
                .bind(&uploaded_by)
                .bind(&now)
                .execute(&mut *conn)
                .await?;

                let row: Document = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await;

    match result {
        Ok(document) => Ok(Json(document)),
        Err(e) => {
            // Metadata failed after the blob landed; remove the orphan
            if let Err(cleanup) = state.storage.delete(&storage_key).await {
                warn!("orphaned blob {} could not be removed: {}", storage_key, cleanup);
            }
            Err(e)
        }
    }
}

/// GET /api/documents/:id
pub async fn get_one(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Json<Document>> {
    let document = fetch_document(&state, parse_id(&id)?).await?;
    check_read_scope(&actor, &document.institution_id)?;
    Ok(Json(document))
}

/// GET /api/documents/:id/download
pub async fn download(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<Response> {
    let document = fetch_document(&state, parse_id(&id)?).await?;
    check_read_scope(&actor, &document.institution_id)?;

    let bytes = state.storage.get(&document.storage_key).await?;
    let response = (
        [
            (header::CONTENT_TYPE, document.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.file_name),
            ),
        ],
        bytes,
    )
        .into_response();
    Ok(response)
}

#[derive(Debug, serde::Deserialize)]
pub struct DocumentReviewRequest {
    /// "accept" or "flag"
    pub action: String,
    pub reason: Option<String>,
}

/// POST /api/documents/:id/review
///
/// Regulator review operation: accepting or flagging a submitted document.
pub async fn review(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(body): Json<DocumentReviewRequest>,
) -> Result<Json<Document>> {
    actor.require(Capability::ReviewSubmissions)?;
    let id = parse_id(&id)?;
    let current = fetch_document(&state, id).await?;
    let institution_id = parse_id(&current.institution_id)?;

    let new_status = match body.action.as_str() {
        "accept" => "ACCEPTED",
        "flag" => "FLAGGED",
        other => return Err(Error::InvalidInput(format!("invalid action: {}", other))),
    };

    let mut spec = MutationSpec::new("DOCUMENT", ChangeType::Update)
        .entity_id(id.to_string())
        .institution(institution_id)
        .field("review_status")
        .old_value(audit_value(&current.review_status))
        .new_value(audit_value(&new_status))
        .review_operation();
    if let Some(reason) = &body.reason {
        spec = spec.reason(reason.clone());
    }

    let document = mutate_with_audit(
        &state.db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE documents SET review_status = ? WHERE id = ?")
                    .bind(new_status)
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await?;

                let row: Document = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row)
            })
        },
    )
    .await?;

    Ok(Json(document))
}
