//! yiba-server library - Yiba Verified HTTP API
//!
//! JSON API over the shared entity stores. All state-changing routes go
//! through the audited-mutation protocol in `yiba-common`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use yiba_common::actor::Actor;
use yiba_common::cache::TtlCache;
use yiba_common::config::AppConfig;

use crate::rate_limit::RateLimiter;
use crate::storage::ObjectStore;

pub mod api;
pub mod rate_limit;
pub mod storage;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    /// Short-TTL memoized actor projections, keyed by session-token hash
    pub actors: Arc<TtlCache<String, Actor>>,
    /// Fixed-window limiter for the public lead endpoint
    pub lead_limiter: Arc<RateLimiter>,
    pub storage: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let lead_limiter = Arc::new(RateLimiter::new(
            config.server.lead_rate_limit,
            Duration::from_secs(config.server.lead_rate_window_seconds),
        ));
        Self {
            db,
            config: Arc::new(config),
            actors: Arc::new(TtlCache::new(Duration::from_secs(30))),
            lead_limiter,
            storage,
        }
    }
}

/// Build application router
///
/// Protected routes require a resolved Actor; `/health`, login, and the
/// public lead capture endpoint do not.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{delete, get, post};

    let protected = Router::new()
        .route("/api/auth/logout", post(api::auth::logout))
        .route(
            "/api/institutions",
            get(api::institutions::list).post(api::institutions::create),
        )
        .route(
            "/api/institutions/:id",
            get(api::institutions::get_one).patch(api::institutions::update),
        )
        .route("/api/users", get(api::users::list).post(api::users::create))
        .route(
            "/api/learners",
            get(api::learners::list).post(api::learners::create),
        )
        .route(
            "/api/learners/:id",
            get(api::learners::get_one)
                .patch(api::learners::update)
                .delete(api::learners::remove),
        )
        .route(
            "/api/readiness",
            get(api::readiness::list).post(api::readiness::create),
        )
        .route("/api/readiness/:id", get(api::readiness::get_one))
        .route("/api/readiness/:id/submit", post(api::readiness::submit))
        .route("/api/readiness/:id/review", post(api::readiness::review))
        .route("/api/documents", post(api::documents::upload))
        .route("/api/documents/:id", get(api::documents::get_one))
        .route("/api/documents/:id/download", get(api::documents::download))
        .route("/api/documents/:id/review", post(api::documents::review))
        .route("/api/audit", get(api::audit::list))
        .route("/api/audit/export", get(api::audit::export))
        .route(
            "/api/campaigns",
            get(api::campaigns::list).post(api::campaigns::create),
        )
        .route("/api/campaigns/:id/queue", post(api::campaigns::queue))
        .route(
            "/api/suppressions",
            get(api::campaigns::list_suppressions).post(api::campaigns::add_suppression),
        )
        .route(
            "/api/suppressions/:address",
            delete(api::campaigns::remove_suppression),
        )
        .route("/api/leads", get(api::leads::list))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::actor_middleware,
        ));

    let public = Router::new()
        .route("/health", get(api::health::health))
        .route("/api/auth/login", post(api::auth::login))
        .route("/api/public/leads", post(api::leads::capture));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
