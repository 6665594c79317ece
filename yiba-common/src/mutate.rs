//! The mutation-with-audit protocol
//!
//! The only sanctioned path for state-changing operations. Every write is
//! tenant-scoped, authorized, and audited, atomically: the caller's
//! authorization predicate, the caller's write, and exactly one audit row
//! share a single SQLite transaction. If any step fails the transaction
//! rolls back and no partial state is observable.
//!
//! This module provides no mutual exclusion across concurrent requests
//! targeting the same row; SQLite's isolation level is the only guarantee
//! beyond atomicity.

use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::actor::Actor;
use crate::audit::{derive_entity_id, insert_audit_row, ChangeType, UNKNOWN_ENTITY_ID};
use crate::{Error, Result};

/// Description of one audited mutation
#[derive(Debug, Clone)]
pub struct MutationSpec {
    /// Entity type tag recorded on the audit row (e.g. `"LEARNER"`)
    pub entity_type: String,
    /// Explicit entity id; when `None` it is derived from the write's result
    pub entity_id: Option<String>,
    /// Owning tenant of the target entity; `None` for regulator-originated
    /// or platform-level entities
    pub institution_id: Option<Uuid>,
    pub change_type: ChangeType,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    /// Explicit allow-list toggle for regulator review operations on
    /// institution-owned data. Never inferred; the caller opts in per route.
    pub allow_regulator_review: bool,
}

impl MutationSpec {
    pub fn new(entity_type: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: None,
            institution_id: None,
            change_type,
            field_name: "*".to_string(),
            old_value: None,
            new_value: None,
            reason: None,
            allow_regulator_review: false,
        }
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn institution(mut self, institution_id: Uuid) -> Self {
        self.institution_id = Some(institution_id);
        self
    }

    pub fn field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn old_value(mut self, value: impl Into<String>) -> Self {
        self.old_value = Some(value.into());
        self
    }

    pub fn new_value(mut self, value: impl Into<String>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Mark this mutation as a sanctioned regulator review operation
    pub fn review_operation(mut self) -> Self {
        self.allow_regulator_review = true;
        self
    }
}

/// Execute one audited mutation.
///
/// Policy checks run before the transaction opens:
/// 1. Regulator roles may not write institution-owned data unless the spec
///    carries the review-operation flag.
/// 2. Institution-scoped actors must match the target's `institution_id`;
///    platform roles are tenant-unscoped.
///
/// Inside one transaction: `authorize` (may read; raises on denial), then
/// `write`, then exactly one audit row. Commit only if all three succeed.
pub async fn mutate_with_audit<T, A, W>(
    db: &SqlitePool,
    actor: &Actor,
    spec: MutationSpec,
    authorize: A,
    write: W,
) -> Result<T>
where
    T: Serialize,
    A: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<()>>,
    W: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
{
    if let Some(target) = spec.institution_id {
        if actor.role.is_regulator() {
            if !spec.allow_regulator_review {
                return Err(Error::Forbidden(format!(
                    "role {} may not write institution-owned {} outside a review operation",
                    actor.role.as_str(),
                    spec.entity_type
                )));
            }
        } else if !actor.role.is_platform() && actor.institution_id != Some(target) {
            return Err(Error::Forbidden(format!(
                "actor institution scope does not match target {}",
                spec.entity_type
            )));
        }
    }

    let mut tx = db.begin().await?;

    authorize(&mut *tx).await?;
    let result = write(&mut *tx).await?;

    let entity_id = match &spec.entity_id {
        Some(id) => id.clone(),
        None => match serde_json::to_value(&result) {
            Ok(value) => derive_entity_id(&value),
            // Serialization failure degrades the audit id, never the write
            Err(_) => UNKNOWN_ENTITY_ID.to_string(),
        },
    };

    insert_audit_row(
        &mut *tx,
        actor,
        &spec.entity_type,
        &entity_id,
        &spec.field_name,
        spec.old_value.as_deref(),
        spec.new_value.as_deref(),
        spec.change_type,
        spec.reason.as_deref(),
        spec.institution_id,
    )
    .await?;

    tx.commit().await?;
    Ok(result)
}
