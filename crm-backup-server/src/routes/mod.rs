pub mod actor;
pub mod backup;
pub mod storage;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let local_root = state.config.local_storage_root.clone();

    Router::new()
        .nest("/api/cron", backup::cron_router())
        .nest("/api/backups", backup::router())
        .nest("/api/storage", storage::router())
        .nest_service("/local-storage", ServeDir::new(local_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
