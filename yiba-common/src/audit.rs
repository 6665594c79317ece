//! Audit log entries
//!
//! Audit rows are write-once: inserted in the same transaction as the
//! mutation they describe, never updated or deleted afterwards.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::actor::Actor;
use crate::Result;

/// Sentinel recorded when no entity id can be derived from a mutation
pub const UNKNOWN_ENTITY_ID: &str = "unknown";

/// Conventional id field names, in derivation priority order
const ID_FIELDS: [&str; 6] = [
    "id",
    "guid",
    "user_id",
    "learner_id",
    "record_id",
    "document_id",
];

/// Kind of state change described by an audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

/// Serialize a domain value for audit storage.
///
/// Domain values vary per entity, so serialization is best-effort: JSON
/// first, `Debug` text as the fallback. A serialization failure degrades
/// the recorded value, it never aborts the mutation.
pub fn audit_value<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(_) => format!("{:?}", value),
    }
}

/// Derive the audit entity id from a mutation's serialized result.
///
/// Checks the conventional id field names in priority order; falls back
/// to [`UNKNOWN_ENTITY_ID`] rather than failing the transaction.
pub fn derive_entity_id(result: &Value) -> String {
    if let Value::Object(map) = result {
        for field in ID_FIELDS {
            match map.get(field) {
                Some(Value::String(s)) => return s.clone(),
                Some(Value::Number(n)) => return n.to_string(),
                _ => continue,
            }
        }
    }
    UNKNOWN_ENTITY_ID.to_string()
}

/// Insert one audit row inside the caller's transaction
pub async fn insert_audit_row(
    conn: &mut SqliteConnection,
    actor: &Actor,
    entity_type: &str,
    entity_id: &str,
    field_name: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    change_type: ChangeType,
    reason: Option<&str>,
    institution_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_log
            (id, entity_type, entity_id, field_name, old_value, new_value,
             changed_by, role_at_time, change_type, reason, institution_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(entity_type)
    .bind(entity_id)
    .bind(field_name)
    .bind(old_value)
    .bind(new_value)
    .bind(actor.user_id.to_string())
    .bind(actor.role.as_str())
    .bind(change_type.as_str())
    .bind(reason)
    .bind(institution_id.map(|u| u.to_string()))
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(id)
}
