//! Audit log listing and export
//!
//! The audit log is append-only; these endpoints are read-only views.
//! Institution actors are forcibly scoped to their own tenant regardless
//! of the filters they pass.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};

use yiba_common::actor::Actor;
use yiba_common::api::types::{Paginated, PAGE_SIZE};
use yiba_common::db::models::AuditRow;
use yiba_common::{Capability, Error, Result};

use crate::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub entity_type: Option<String>,
    /// Actor user id
    pub changed_by: Option<String>,
    /// RFC3339 lower bound (inclusive)
    pub from: Option<String>,
    /// RFC3339 upper bound (exclusive)
    pub to: Option<String>,
    pub institution_id: Option<String>,
    /// Export only: "csv" or "json"
    pub format: Option<String>,
}

fn default_page() -> i64 {
    1
}

/// Resolved filter set with tenant scoping applied
struct Filters {
    clauses: Vec<&'static str>,
    binds: Vec<String>,
}

fn build_filters(actor: &Actor, query: &AuditQuery) -> Result<Filters> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    // Institution actors only ever see their own tenant
    if actor.role.is_institution_scoped() {
        let inst = actor
            .institution_id
            .ok_or_else(|| Error::Forbidden("no institution scope".to_string()))?;
        clauses.push("institution_id = ?");
        binds.push(inst.to_string());
    } else if let Some(inst) = &query.institution_id {
        clauses.push("institution_id = ?");
        binds.push(inst.clone());
    }

    if let Some(entity_type) = &query.entity_type {
        clauses.push("entity_type = ?");
        binds.push(entity_type.clone());
    }
    if let Some(changed_by) = &query.changed_by {
        clauses.push("changed_by = ?");
        binds.push(changed_by.clone());
    }
    if let Some(from) = &query.from {
        chrono::DateTime::parse_from_rfc3339(from)
            .map_err(|_| Error::InvalidInput(format!("invalid from timestamp: {}", from)))?;
        clauses.push("created_at >= ?");
        binds.push(from.clone());
    }
    if let Some(to) = &query.to {
        chrono::DateTime::parse_from_rfc3339(to)
            .map_err(|_| Error::InvalidInput(format!("invalid to timestamp: {}", to)))?;
        clauses.push("created_at < ?");
        binds.push(to.clone());
    }

    Ok(Filters { clauses, binds })
}

fn where_sql(filters: &Filters) -> String {
    if filters.clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filters.clauses.join(" AND "))
    }
}

async fn fetch_rows(
    state: &AppState,
    filters: &Filters,
    limit: Option<(i64, i64)>,
) -> Result<Vec<AuditRow>> {
    let mut sql = format!(
        "SELECT * FROM audit_log{} ORDER BY created_at DESC",
        where_sql(filters)
    );
    if let Some((limit, offset)) = limit {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    }

    let mut query = sqlx::query_as(&sql);
    for bind in &filters.binds {
        query = query.bind(bind);
    }
    Ok(query.fetch_all(&state.db).await?)
}

async fn count_rows(state: &AppState, filters: &Filters) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM audit_log{}", where_sql(filters));
    let mut query = sqlx::query_scalar(&sql);
    for bind in &filters.binds {
        query = query.bind(bind);
    }
    Ok(query.fetch_one(&state.db).await?)
}

/// GET /api/audit
pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Paginated<AuditRow>>> {
    actor.require(Capability::ViewAuditLogs)?;
    let filters = build_filters(&actor, &query)?;

    let total = count_rows(&state, &filters).await?;
    let offset = Paginated::<AuditRow>::offset(total, query.page);
    let rows = fetch_rows(&state, &filters, Some((PAGE_SIZE, offset))).await?;

    Ok(Json(Paginated::new(total, query.page, rows)))
}

/// GET /api/audit/export?format=csv|json
pub async fn export(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AuditQuery>,
) -> Result<Response> {
    actor.require(Capability::ExportAuditLogs)?;
    let filters = build_filters(&actor, &query)?;
    let rows = fetch_rows(&state, &filters, None).await?;

    match query.format.as_deref().unwrap_or("json") {
        "json" => Ok(Json(rows).into_response()),
        "csv" => {
            let csv = to_csv(&rows);
            let response = (
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"audit_export.csv\"".to_string(),
                    ),
                ],
                csv,
            )
                .into_response();
            Ok(response)
        }
        other => Err(Error::InvalidInput(format!("invalid format: {}", other))),
    }
}

const CSV_HEADER: &str = "id,entity_type,entity_id,field_name,old_value,new_value,\
                          changed_by,role_at_time,change_type,reason,institution_id,created_at";

fn to_csv(rows: &[AuditRow]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in rows {
        let fields = [
            row.id.as_str(),
            row.entity_type.as_str(),
            row.entity_id.as_str(),
            row.field_name.as_str(),
            row.old_value.as_deref().unwrap_or(""),
            row.new_value.as_deref().unwrap_or(""),
            row.changed_by.as_str(),
            row.role_at_time.as_str(),
            row.change_type.as_str(),
            row.reason.as_deref().unwrap_or(""),
            row.institution_id.as_deref().unwrap_or(""),
            row.created_at.as_str(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// RFC 4180 quoting: wrap fields containing separators or quotes
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
