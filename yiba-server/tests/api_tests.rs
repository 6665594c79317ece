//! Integration tests for yiba-server API endpoints
//!
//! Tests cover:
//! - Health endpoint (no auth required)
//! - Actor resolution middleware (401 without credentials)
//! - Capability and tenant enforcement (403)
//! - Audited CRUD happy paths and the audit listing/export views
//! - Public lead capture with rate limiting

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::util::ServiceExt; // for `oneshot` method
use uuid::Uuid;

use yiba_common::config::AppConfig;
use yiba_server::storage::LocalStore;
use yiba_server::{build_router, AppState};

/// Test helper: fully migrated in-memory database
async fn setup_test_db() -> SqlitePool {
    yiba_common::db::connect_memory()
        .await
        .expect("Should create in-memory database")
}

/// Test helper: app with dev bypass enabled so tests authenticate with
/// the x-dev-actor header instead of real sessions.
///
/// The returned TempDir is the LocalStore root; callers must hold it for
/// the test's lifetime or uploads land in a deleted directory.
fn setup_app(db: SqlitePool) -> (axum::Router, tempfile::TempDir) {
    let mut config = AppConfig::default();
    config.server.dev_bypass = true;
    config.server.lead_rate_limit = 3;

    let dir = tempfile::tempdir().expect("Should create temp dir");
    let storage = Arc::new(LocalStore::new(dir.path().join("documents")));

    let state = AppState::new(db, config, storage);
    (build_router(state), dir)
}

fn bypass(role: &str, user_id: Uuid, institution_id: Option<Uuid>) -> String {
    match institution_id {
        Some(inst) => format!("{}:{}:{}", role, user_id, inst),
        None => format!("{}:{}", role, user_id),
    }
}

fn request(method: &str, uri: &str, actor: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header("x-dev-actor", actor);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn extract_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8(bytes.to_vec()).expect("Should be UTF-8")
}

/// Seed an institution row directly; returns its id
async fn seed_institution(db: &SqlitePool, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO institutions (id, name, accreditation_number, status, created_at, updated_at)
         VALUES (?, ?, 'ACC-001', 'ACTIVE', ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await
    .expect("Should seed institution");
    id
}

/// Seed a user row directly; returns its id
async fn seed_user(db: &SqlitePool, email: &str, role: &str, institution_id: Option<Uuid>) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, display_name, role,
                            institution_id, org_id, created_at, updated_at)
         VALUES (?, ?, 'x', 'Test User', ?, ?, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(role)
    .bind(institution_id.map(|u| u.to_string()))
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await
    .expect("Should seed user");
    id
}

// =============================================================================
// Health and authentication
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db);

    let response = app
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "yiba-server");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_protected_route_requires_credentials() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db);

    let response = app
        .oneshot(request("GET", "/api/learners", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bypass_header_ignored_when_disabled() {
    let db = setup_test_db().await;

    let config = AppConfig::default(); // dev_bypass = false
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStore::new(dir.path().join("documents")));
    let state = AppState::new(db, config, storage);
    let app = build_router(state);

    let actor = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);
    let response = app
        .oneshot(request("GET", "/api/learners", Some(&actor), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_rejects_unknown_email() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db);

    let response = app
        .oneshot(request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "nobody@example.test", "password": "whatever-long" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Capability and tenant enforcement
// =============================================================================

#[tokio::test]
async fn test_student_cannot_create_institution() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db);

    let actor = bypass("STUDENT", Uuid::new_v4(), None);
    let response = app
        .oneshot(request(
            "POST",
            "/api/institutions",
            Some(&actor),
            Some(json!({ "name": "Hack College", "accreditation_number": "X" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cross_tenant_read_is_forbidden() {
    let db = setup_test_db().await;
    let inst_a = seed_institution(&db, "College A").await;
    let inst_b = seed_institution(&db, "College B").await;
    let staff_b = seed_user(&db, "staff@b.test", "INSTITUTION_STAFF", Some(inst_b)).await;

    let (app, _store_dir) = setup_app(db.clone());

    // Learner in institution A, created by a platform admin
    let admin = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/learners",
            Some(&admin),
            Some(json!({
                "first_name": "Thandi",
                "last_name": "Nkosi",
                "national_id": "9001015800087",
                "institution_id": inst_a.to_string(),
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let learner = extract_json(response.into_body()).await;

    // Staff from institution B cannot read it
    let actor_b = bypass("INSTITUTION_STAFF", staff_b, Some(inst_b));
    let response = app
        .oneshot(request(
            "GET",
            &format!("/api/learners/{}", learner["id"].as_str().unwrap()),
            Some(&actor_b),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cross_tenant_write_is_forbidden() {
    let db = setup_test_db().await;
    let inst_a = seed_institution(&db, "College A").await;
    let inst_b = seed_institution(&db, "College B").await;
    let staff_b = seed_user(&db, "staff@b.test", "INSTITUTION_STAFF", Some(inst_b)).await;

    let (app, _store_dir) = setup_app(db.clone());

    let actor_b = bypass("INSTITUTION_STAFF", staff_b, Some(inst_b));
    let response = app
        .oneshot(request(
            "POST",
            "/api/learners",
            Some(&actor_b),
            Some(json!({
                "first_name": "Sipho",
                "last_name": "Dlamini",
                "national_id": "9001015800087",
                "institution_id": inst_a.to_string(),
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Denied writes leave no rows behind
    let learners: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM learners")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(learners, 0);
    let audits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(audits, 0);
}

// =============================================================================
// Audited CRUD
// =============================================================================

#[tokio::test]
async fn test_learner_create_writes_audit_row() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;
    let staff = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst)).await;

    let (app, _store_dir) = setup_app(db.clone());

    let actor = bypass("INSTITUTION_STAFF", staff, Some(inst));
    let response = app
        .oneshot(request(
            "POST",
            "/api/learners",
            Some(&actor),
            Some(json!({
                "first_name": "Thandi",
                "last_name": "Nkosi",
                "national_id": "9001015800087",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let learner = extract_json(response.into_body()).await;
    assert_eq!(learner["enrolment_status"], "ENROLLED");
    assert_eq!(learner["institution_id"], inst.to_string());

    let (entity_type, entity_id, change_type, role_at_time): (String, String, String, String) =
        sqlx::query_as(
            "SELECT entity_type, entity_id, change_type, role_at_time FROM audit_log",
        )
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(entity_type, "LEARNER");
    assert_eq!(entity_id, learner["id"].as_str().unwrap());
    assert_eq!(change_type, "CREATE");
    assert_eq!(role_at_time, "INSTITUTION_STAFF");
}

#[tokio::test]
async fn test_readiness_lifecycle() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;
    let staff = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst)).await;
    let qcto = seed_user(&db, "qcto@gov.test", "QCTO_USER", None).await;

    let (app, _store_dir) = setup_app(db.clone());
    let staff_actor = bypass("INSTITUTION_STAFF", staff, Some(inst));
    let qcto_actor = bypass("QCTO_USER", qcto, None);

    // Create draft
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/readiness",
            Some(&staff_actor),
            Some(json!({ "qualification": "Plumbing NQF4" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = extract_json(response.into_body()).await;
    assert_eq!(record["status"], "DRAFT");
    let id = record["id"].as_str().unwrap().to_string();

    // Regulator cannot review a draft
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/readiness/{}/review", id),
            Some(&qcto_actor),
            Some(json!({ "decision": "approve" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Submit
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/readiness/{}/submit", id),
            Some(&staff_actor),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = extract_json(response.into_body()).await;
    assert_eq!(record["status"], "SUBMITTED");
    assert!(record["submitted_at"].is_string());

    // Regulator approves; this is a review operation on tenant data
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/readiness/{}/review", id),
            Some(&qcto_actor),
            Some(json!({ "decision": "approve", "comment": "All evidence in order" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = extract_json(response.into_body()).await;
    assert_eq!(record["status"], "APPROVED");

    // Three audit rows: create, submit, review
    let audits: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT change_type, reason FROM audit_log ORDER BY created_at")
            .fetch_all(&db)
            .await
            .unwrap();
    assert_eq!(audits.len(), 3);
    assert_eq!(audits[2].1.as_deref(), Some("All evidence in order"));
}

#[tokio::test]
async fn test_institution_staff_cannot_review() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;
    let staff = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst)).await;

    let (app, _store_dir) = setup_app(db);
    let staff_actor = bypass("INSTITUTION_STAFF", staff, Some(inst));

    let response = app
        .oneshot(request(
            "POST",
            &format!("/api/readiness/{}/review", Uuid::new_v4()),
            Some(&staff_actor),
            Some(json!({ "decision": "approve" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// Audit views
// =============================================================================

#[tokio::test]
async fn test_audit_listing_scoped_to_own_institution() {
    let db = setup_test_db().await;
    let inst_a = seed_institution(&db, "College A").await;
    let inst_b = seed_institution(&db, "College B").await;
    let admin_a = seed_user(&db, "admin@a.test", "INSTITUTION_ADMIN", Some(inst_a)).await;

    let (app, _store_dir) = setup_app(db.clone());
    let platform = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);

    for (inst, name) in [(inst_a, "Ada"), (inst_b, "Ben")] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/learners",
                Some(&platform),
                Some(json!({
                    "first_name": name,
                    "last_name": "Test",
                    "national_id": "9001015800087",
                    "institution_id": inst.to_string(),
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Institution admin sees only their tenant, even when asking for the other
    let actor_a = bypass("INSTITUTION_ADMIN", admin_a, Some(inst_a));
    let response = app
        .oneshot(request(
            "GET",
            &format!("/api/audit?institution_id={}", inst_b),
            Some(&actor_a),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total_rows"], 1);
    assert_eq!(body["rows"][0]["institution_id"], inst_a.to_string());
}

#[tokio::test]
async fn test_audit_export_csv() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;

    let (app, _store_dir) = setup_app(db);
    let platform = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/learners",
            Some(&platform),
            Some(json!({
                "first_name": "Thandi",
                "last_name": "Nkosi",
                "national_id": "9001015800087",
                "institution_id": inst.to_string(),
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request(
            "GET",
            "/api/audit/export?format=csv",
            Some(&platform),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/csv"
    );

    let csv = extract_text(response.into_body()).await;
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("id,entity_type"));
    assert!(lines.next().unwrap().contains("LEARNER"));
}

#[tokio::test]
async fn test_audit_export_rejects_unknown_format() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db);
    let platform = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);

    let response = app
        .oneshot(request(
            "GET",
            "/api/audit/export?format=xml",
            Some(&platform),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Public lead capture
// =============================================================================

#[tokio::test]
async fn test_lead_capture_and_rate_limit() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db.clone());

    let lead = json!({
        "name": "Prospective Student",
        "email": "prospect@example.test",
        "message": "How do I enrol?",
    });

    // Limit is 3 per window in the test config
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/public/leads", None, Some(lead.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .clone()
        .oneshot(request("POST", "/api/public/leads", None, Some(lead.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_lead_capture_validates_email() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db);

    let response = app
        .oneshot(request(
            "POST",
            "/api/public/leads",
            None,
            Some(json!({ "name": "X", "email": "not-an-email", "message": "hi" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lead_capture_enqueues_notification() {
    let db = setup_test_db().await;
    sqlx::query("INSERT INTO settings (key, value) VALUES ('lead_notification_address', 'sales@yibaverified.co.za')")
        .execute(&db)
        .await
        .unwrap();

    let (app, _store_dir) = setup_app(db.clone());
    let response = app
        .oneshot(request(
            "POST",
            "/api/public/leads",
            None,
            Some(json!({
                "name": "Prospect",
                "email": "prospect@example.test",
                "message": "Call me",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (to_address, status): (String, String) =
        sqlx::query_as("SELECT to_address, status FROM email_queue")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(to_address, "sales@yibaverified.co.za");
    assert_eq!(status, "PENDING");
}

#[tokio::test]
async fn test_lead_listing_requires_capability() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;
    let staff = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst)).await;

    let (app, _store_dir) = setup_app(db);
    let staff_actor = bypass("INSTITUTION_STAFF", staff, Some(inst));

    let response = app
        .oneshot(request("GET", "/api/leads", Some(&staff_actor), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// Campaigns
// =============================================================================

#[tokio::test]
async fn test_campaign_create_queue_and_suppression() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db.clone());
    let platform = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/campaigns",
            Some(&platform),
            Some(json!({
                "name": "Spring intake",
                "subject": "Enrolment now open",
                "body": "Apply today.",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let campaign = extract_json(response.into_body()).await;
    assert_eq!(campaign["status"], "DRAFT");
    let id = campaign["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/campaigns/{}/queue", id),
            Some(&platform),
            Some(json!({ "recipients": ["a@example.test", "b@example.test"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["queued"], 2);

    // Queueing twice is rejected
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/campaigns/{}/queue", id),
            Some(&platform),
            Some(json!({ "recipients": ["c@example.test"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM email_queue WHERE status = 'PENDING'")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(pending, 2);

    // Suppress one recipient
    let response = app
        .oneshot(request(
            "POST",
            "/api/suppressions",
            Some(&platform),
            Some(json!({ "address": "B@example.test", "reason": "unsubscribed" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (address,): (String,) = sqlx::query_as("SELECT address FROM email_suppressions")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(address, "b@example.test"); // stored lowercased
}

// =============================================================================
// Documents
// =============================================================================

/// Raw-body upload request; metadata travels in query + headers
fn upload_request(uri: &str, actor: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-dev-actor", actor)
        .header("content-type", content_type)
        .body(Body::from(bytes.to_vec()))
        .unwrap()
}

#[tokio::test]
async fn test_document_upload_download_and_review() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;
    let staff = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst)).await;
    let qcto = seed_user(&db, "qcto@gov.test", "QCTO_USER", None).await;

    let (app, _store_dir) = setup_app(db.clone());
    let staff_actor = bypass("INSTITUTION_STAFF", staff, Some(inst));
    let qcto_actor = bypass("QCTO_USER", qcto, None);

    // Upload
    let content = b"%PDF-1.4 evidence";
    let response = app
        .clone()
        .oneshot(upload_request(
            "/api/documents?file_name=evidence.pdf",
            &staff_actor,
            "application/pdf",
            content,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let document = extract_json(response.into_body()).await;
    assert_eq!(document["file_name"], "evidence.pdf");
    assert_eq!(document["review_status"], "PENDING");
    assert_eq!(document["size_bytes"], content.len() as i64);
    let id = document["id"].as_str().unwrap().to_string();

    // Download returns the stored bytes with the original content type
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/documents/{}/download", id),
            Some(&staff_actor),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    assert!(response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("evidence.pdf"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), content);

    // Regulator accepts the document (review operation on tenant data)
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/documents/{}/review", id),
            Some(&qcto_actor),
            Some(json!({ "action": "accept" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let document = extract_json(response.into_body()).await;
    assert_eq!(document["review_status"], "ACCEPTED");

    // Two audit rows: the upload and the review, both tenant-tagged
    let audits: Vec<(String, String, Option<String>)> = sqlx::query_as(
        "SELECT change_type, role_at_time, institution_id FROM audit_log ORDER BY created_at",
    )
    .fetch_all(&db)
    .await
    .unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].0, "CREATE");
    assert_eq!(audits[1].1, "QCTO_USER");
    assert_eq!(audits[1].2.as_deref(), Some(inst.to_string().as_str()));
}

#[tokio::test]
async fn test_document_download_is_tenant_scoped() {
    let db = setup_test_db().await;
    let inst_a = seed_institution(&db, "College A").await;
    let inst_b = seed_institution(&db, "College B").await;
    let staff_a = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst_a)).await;
    let staff_b = seed_user(&db, "staff@b.test", "INSTITUTION_STAFF", Some(inst_b)).await;

    let (app, _store_dir) = setup_app(db);
    let actor_a = bypass("INSTITUTION_STAFF", staff_a, Some(inst_a));
    let actor_b = bypass("INSTITUTION_STAFF", staff_b, Some(inst_b));

    let response = app
        .clone()
        .oneshot(upload_request(
            "/api/documents?file_name=sla.pdf",
            &actor_a,
            "application/pdf",
            b"contract",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let document = extract_json(response.into_body()).await;
    let id = document["id"].as_str().unwrap();

    let response = app
        .oneshot(request(
            "GET",
            &format!("/api/documents/{}/download", id),
            Some(&actor_b),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_document_upload_rejects_bad_file_name() {
    let db = setup_test_db().await;
    let inst = seed_institution(&db, "College A").await;
    let staff = seed_user(&db, "staff@a.test", "INSTITUTION_STAFF", Some(inst)).await;

    let (app, _store_dir) = setup_app(db);
    let staff_actor = bypass("INSTITUTION_STAFF", staff, Some(inst));

    let response = app
        .oneshot(upload_request(
            "/api/documents?file_name=../../etc/passwd",
            &staff_actor,
            "text/plain",
            b"x",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Users
// =============================================================================

#[tokio::test]
async fn test_user_create_audit_value_is_valid_json() {
    let db = setup_test_db().await;
    let (app, _store_dir) = setup_app(db.clone());
    let platform = bypass("PLATFORM_ADMIN", Uuid::new_v4(), None);

    // A quote in the local part is legal; the audit value must survive it
    let email = "o\"brien@example.test";
    let response = app
        .oneshot(request(
            "POST",
            "/api/users",
            Some(&platform),
            Some(json!({
                "email": email,
                "password": "long-enough-password",
                "display_name": "O'Brien",
                "role": "QCTO_USER",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let new_value: Option<String> = sqlx::query_scalar("SELECT new_value FROM audit_log")
        .fetch_one(&db)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(new_value.as_deref().unwrap())
        .expect("audit new_value should be well-formed JSON");
    assert_eq!(parsed["email"], email);
    assert_eq!(parsed["role"], "QCTO_USER");
}
