//! Integration tests for the mutation-with-audit protocol
//!
//! Covers:
//! - Atomicity: authorization denial or mid-write failure leaves no trace
//! - Exactly one audit row per successful mutation
//! - Regulator write restrictions and the review-operation allow-list
//! - Tenant scoping for institution actors

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use yiba_common::actor::Actor;
use yiba_common::audit::ChangeType;
use yiba_common::db::connect_memory;
use yiba_common::mutate::{mutate_with_audit, MutationSpec};
use yiba_common::{Error, Role};

async fn setup_db() -> SqlitePool {
    connect_memory().await.expect("in-memory database")
}

async fn seed_institution(db: &SqlitePool) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO institutions (id, name, accreditation_number, status, created_at, updated_at)
         VALUES (?, ?, ?, 'ACTIVE', ?, ?)",
    )
    .bind(id.to_string())
    .bind("Test College")
    .bind("QCTO-001")
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await
    .expect("seed institution");
    id
}

async fn seed_learner(db: &SqlitePool, institution_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO learners (id, institution_id, first_name, last_name, national_id,
                               enrolment_status, created_at, updated_at)
         VALUES (?, ?, 'Thandi', 'Mokoena', '9001015800084', 'ENROLLED', ?, ?)",
    )
    .bind(id.to_string())
    .bind(institution_id.to_string())
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await
    .expect("seed learner");
    id
}

fn staff_actor(institution_id: Uuid) -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role: Role::InstitutionStaff,
        institution_id: Some(institution_id),
        org_id: None,
    }
}

fn qcto_actor() -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role: Role::QctoUser,
        institution_id: None,
        org_id: Some(Uuid::new_v4()),
    }
}

async fn audit_count(db: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
        .fetch_one(db)
        .await
        .expect("count audit rows")
}

async fn learner_status(db: &SqlitePool, learner_id: Uuid) -> String {
    sqlx::query_scalar("SELECT enrolment_status FROM learners WHERE id = ?")
        .bind(learner_id.to_string())
        .fetch_one(db)
        .await
        .expect("learner status")
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_successful_mutation_writes_one_audit_row() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let learner = seed_learner(&db, inst).await;
    let actor = staff_actor(inst);

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(learner.to_string())
        .institution(inst)
        .field("enrolment_status")
        .old_value("\"ENROLLED\"")
        .new_value("\"COMPLETED\"");

    let updated: String = mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE learners SET enrolment_status = 'COMPLETED' WHERE id = ?")
                    .bind(learner.to_string())
                    .execute(conn)
                    .await?;
                Ok("COMPLETED".to_string())
            })
        },
    )
    .await
    .expect("mutation should succeed");

    assert_eq!(updated, "COMPLETED");
    assert_eq!(learner_status(&db, learner).await, "COMPLETED");
    assert_eq!(audit_count(&db).await, 1);

    let (old_value, new_value, role_at_time): (Option<String>, Option<String>, String) =
        sqlx::query_as("SELECT old_value, new_value, role_at_time FROM audit_log")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(old_value.as_deref(), Some("\"ENROLLED\""));
    assert_eq!(new_value.as_deref(), Some("\"COMPLETED\""));
    assert_eq!(role_at_time, "INSTITUTION_STAFF");
}

#[tokio::test]
async fn test_entity_id_derived_from_result() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let actor = staff_actor(inst);

    #[derive(serde::Serialize)]
    struct Created {
        id: String,
        first_name: String,
    }

    let new_id = Uuid::new_v4();
    let spec = MutationSpec::new("LEARNER", ChangeType::Create)
        .institution(inst)
        .field("*");

    mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                let now = Utc::now().to_rfc3339();
                sqlx::query(
                    "INSERT INTO learners (id, institution_id, first_name, last_name,
                                           national_id, enrolment_status, created_at, updated_at)
                     VALUES (?, ?, 'Sipho', 'Dlamini', '8805125800085', 'ENROLLED', ?, ?)",
                )
                .bind(new_id.to_string())
                .bind(inst.to_string())
                .bind(&now)
                .bind(&now)
                .execute(conn)
                .await?;
                Ok(Created {
                    id: new_id.to_string(),
                    first_name: "Sipho".to_string(),
                })
            })
        },
    )
    .await
    .expect("create should succeed");

    let entity_id: String = sqlx::query_scalar("SELECT entity_id FROM audit_log")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(entity_id, new_id.to_string());
}

// =============================================================================
// Atomicity
// =============================================================================

#[tokio::test]
async fn test_authorize_denial_rolls_back_everything() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let learner = seed_learner(&db, inst).await;
    let actor = staff_actor(inst);

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(learner.to_string())
        .institution(inst);

    let result: Result<String, Error> = mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| {
            Box::pin(async { Err(Error::Forbidden("record is locked for review".to_string())) })
        },
        |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE learners SET enrolment_status = 'WITHDRAWN' WHERE id = ?")
                    .bind(learner.to_string())
                    .execute(conn)
                    .await?;
                Ok("WITHDRAWN".to_string())
            })
        },
    )
    .await;

    assert!(matches!(result, Err(Error::Forbidden(_))));
    assert_eq!(learner_status(&db, learner).await, "ENROLLED");
    assert_eq!(audit_count(&db).await, 0);
}

#[tokio::test]
async fn test_mid_write_failure_rolls_back_partial_changes() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let learner = seed_learner(&db, inst).await;
    let actor = staff_actor(inst);

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(learner.to_string())
        .institution(inst);

    // Write applies a change, then fails; the partial update must not survive
    let result: Result<String, Error> = mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE learners SET enrolment_status = 'WITHDRAWN' WHERE id = ?")
                    .bind(learner.to_string())
                    .execute(conn)
                    .await?;
                Err(Error::Internal("write failed mid-flight".to_string()))
            })
        },
    )
    .await;

    assert!(matches!(result, Err(Error::Internal(_))));
    assert_eq!(learner_status(&db, learner).await, "ENROLLED");
    assert_eq!(audit_count(&db).await, 0);
}

// =============================================================================
// Regulator write restrictions
// =============================================================================

#[tokio::test]
async fn test_regulator_write_without_review_flag_is_forbidden() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let learner = seed_learner(&db, inst).await;
    let actor = qcto_actor();

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(learner.to_string())
        .institution(inst);

    let result: Result<String, Error> = mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE learners SET enrolment_status = 'WITHDRAWN' WHERE id = ?")
                    .bind(learner.to_string())
                    .execute(conn)
                    .await?;
                Ok("WITHDRAWN".to_string())
            })
        },
    )
    .await;

    assert!(matches!(result, Err(Error::Forbidden(_))));
    assert_eq!(learner_status(&db, learner).await, "ENROLLED");
    assert_eq!(audit_count(&db).await, 0);
}

#[tokio::test]
async fn test_regulator_review_operation_succeeds_and_is_audited() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let actor = qcto_actor();

    // Seed a document owned by the institution
    let doc_id = Uuid::new_v4();
    let uploader_id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, display_name, role,
                            institution_id, created_at, updated_at)
         VALUES (?, 'uploader@a.test', 'hash', 'Uploader', 'INSTITUTION_STAFF', ?, ?, ?)",
    )
    .bind(uploader_id.to_string())
    .bind(inst.to_string())
    .bind(&now)
    .bind(&now)
    .execute(&db)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO documents (id, institution_id, file_name, storage_key, content_type,
                                size_bytes, review_status, uploaded_by, created_at)
         VALUES (?, ?, 'sla.pdf', 'docs/sla.pdf', 'application/pdf', 1024, 'PENDING', ?, ?)",
    )
    .bind(doc_id.to_string())
    .bind(inst.to_string())
    .bind(uploader_id.to_string())
    .bind(&now)
    .execute(&db)
    .await
    .unwrap();

    let spec = MutationSpec::new("DOCUMENT", ChangeType::Update)
        .entity_id(doc_id.to_string())
        .institution(inst)
        .field("review_status")
        .old_value("\"PENDING\"")
        .new_value("\"ACCEPTED\"")
        .reason("document accepted after review")
        .review_operation();

    mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        move |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE documents SET review_status = 'ACCEPTED' WHERE id = ?")
                    .bind(doc_id.to_string())
                    .execute(conn)
                    .await?;
                Ok("ACCEPTED".to_string())
            })
        },
    )
    .await
    .expect("review operation should succeed");

    let status: String = sqlx::query_scalar("SELECT review_status FROM documents WHERE id = ?")
        .bind(doc_id.to_string())
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(status, "ACCEPTED");

    assert_eq!(audit_count(&db).await, 1);
    let role_at_time: String = sqlx::query_scalar("SELECT role_at_time FROM audit_log")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(role_at_time, "QCTO_USER");
}

// =============================================================================
// Tenant scoping
// =============================================================================

#[tokio::test]
async fn test_cross_tenant_mutation_is_forbidden() {
    let db = setup_db().await;
    let inst_a = seed_institution(&db).await;
    let inst_b = seed_institution(&db).await;
    let learner_b = seed_learner(&db, inst_b).await;

    // Actor scoped to institution A targets an entity owned by B
    let actor = staff_actor(inst_a);

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(learner_b.to_string())
        .institution(inst_b);

    let result: Result<String, Error> = mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE learners SET enrolment_status = 'WITHDRAWN' WHERE id = ?")
                    .bind(learner_b.to_string())
                    .execute(conn)
                    .await?;
                Ok("WITHDRAWN".to_string())
            })
        },
    )
    .await;

    assert!(matches!(result, Err(Error::Forbidden(_))));
    assert_eq!(learner_status(&db, learner_b).await, "ENROLLED");
    assert_eq!(audit_count(&db).await, 0);
}

#[tokio::test]
async fn test_platform_admin_is_tenant_unscoped() {
    let db = setup_db().await;
    let inst = seed_institution(&db).await;
    let learner = seed_learner(&db, inst).await;

    let actor = Actor {
        user_id: Uuid::new_v4(),
        role: Role::PlatformAdmin,
        institution_id: None,
        org_id: None,
    };

    let spec = MutationSpec::new("LEARNER", ChangeType::Update)
        .entity_id(learner.to_string())
        .institution(inst);

    mutate_with_audit(
        &db,
        &actor,
        spec,
        |_conn| Box::pin(async { Ok(()) }),
        |conn| {
            Box::pin(async move {
                sqlx::query("UPDATE learners SET enrolment_status = 'COMPLETED' WHERE id = ?")
                    .bind(learner.to_string())
                    .execute(conn)
                    .await?;
                Ok("COMPLETED".to_string())
            })
        },
    )
    .await
    .expect("platform admin mutation should succeed");

    assert_eq!(learner_status(&db, learner).await, "COMPLETED");
    assert_eq!(audit_count(&db).await, 1);
}
