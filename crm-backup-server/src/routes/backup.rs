use crate::error::AppError;
use crate::routes::actor::RequestActor;
use crate::services::backup_scheduler::trigger_backup;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use crm_storage::audit::{self, AuditEntry};
use crm_storage::backups::{self, BackupArtifact};
use crm_storage::export::{artifact_file_name, export_full_snapshot, iso_timestamp, ExportManifest};
use crm_storage::scheduler::TriggerResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub fn cron_router() -> Router<Arc<AppState>> {
    Router::new().route("/backup", get(cron_backup))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/snapshot", get(download_snapshot))
        .route("/{name}", get(download_backup).delete(delete_backup))
}

#[derive(Deserialize)]
struct CronQuery {
    secret: Option<String>,
}

/// External cron entry point. Always answers with a `success` flag.
async fn cron_backup(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CronQuery>,
) -> Response {
    if state.scheduler.authorize(query.secret.as_deref()).is_err() {
        tracing::warn!("Rejected backup trigger with invalid secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "Unauthorized" })),
        )
            .into_response();
    }

    match trigger_backup(&state, query.secret.as_deref()).await {
        Ok(outcome) => Json(TriggerResponse::from(&outcome)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Backup trigger failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Result<Json<Vec<BackupArtifact>>, AppError> {
    actor.require_admin()?;
    Ok(Json(backups::list_backups(&state.config.backups_dir).await?))
}

/// Back up now. The schedule is not consulted and `last_backup_at` is untouched.
async fn create_backup(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Result<Json<serde_json::Value>, AppError> {
    let config = &state.config;
    let manifest = ExportManifest::new(
        config.export_schema_version.clone(),
        config.streaming_tables.clone(),
    );
    let artifact = backups::create_backup(
        &actor,
        &state.scanner,
        &manifest,
        &config.backups_dir,
        config.export_page_size,
        state.audit.as_ref(),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "fileName": artifact.file_name,
        "timestamp": iso_timestamp(&artifact.timestamp),
        "size": artifact.size,
    })))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let file =
        backups::open_backup(&actor, &state.config.backups_dir, &name, state.audit.as_ref())
            .await?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
        ],
        body,
    ))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    backups::delete_backup(&actor, &state.config.backups_dir, &name, state.audit.as_ref()).await?;
    Ok(Json(json!({ "success": true })))
}

/// Full in-memory snapshot served as a file download.
async fn download_snapshot(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Result<impl IntoResponse, AppError> {
    actor.require_admin()?;

    let manifest = ExportManifest::new(
        state.config.export_schema_version.clone(),
        state.config.snapshot_tables.clone(),
    );
    let doc = export_full_snapshot(&state.scanner, &manifest, state.config.export_page_size).await?;
    tracing::info!(actor = %actor.id, rows = doc.row_count(), "Snapshot exported");

    let file_name = artifact_file_name(&manifest.timestamp);
    audit::record(
        state.audit.as_ref(),
        AuditEntry::new("backup.snapshot_downloaded", "backup")
            .by(&actor.id)
            .details(json!({ "fileName": file_name, "rows": doc.row_count() })),
    )
    .await;

    let body = serde_json::to_vec_pretty(&doc).map_err(|e| AppError::Internal(e.into()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::db::{connection::create_pool, migrate::migrate};
    use crate::models::settings::SqliteSettingsStore;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body, Bytes};
    use axum::http::{Method, Request, StatusCode};
    use crm_storage::settings::{self, BackupFrequency, Setting, SettingKey, SettingsStore};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config(dir: &TempDir) -> AppConfig {
        AppConfig {
            port: 0,
            database_path: dir.path().join("crm.db"),
            backups_dir: dir.path().join("backups"),
            local_storage_root: dir.path().join("local-storage"),
            cron_secret: "s3cret".into(),
            backup_tick_cron: None,
            export_page_size: 2,
            export_schema_version: "1.0".into(),
            streaming_tables: vec!["clients".into()],
            snapshot_tables: vec!["clients".into()],
            s3: None,
            presign_default_secs: 3600,
            log_level: "info".into(),
        }
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let config = test_config(dir);
        let pool = create_pool(&config.database_path).unwrap();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE clients (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO clients (name) VALUES ('a'), ('b'), ('c');",
        )
        .unwrap();
        drop(conn);
        Arc::new(AppState::new(pool, config, None))
    }

    async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        role: Option<&str>,
    ) -> (StatusCode, Bytes) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(role) = role {
            request = request.header("x-actor-id", "admin-1").header("x-actor-role", role);
        }
        let response = create_router(state.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, bytes) = send(state, Method::GET, uri, Some("admin")).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn enable_daily(state: &Arc<AppState>) -> SqliteSettingsStore {
        let store = SqliteSettingsStore::new(state.db.clone());
        settings::save(&store, &Setting::BackupFrequency(BackupFrequency::Daily))
            .await
            .unwrap();
        store
    }

    fn audit_actor(state: &Arc<AppState>, action: &str) -> Option<String> {
        let conn = state.db.get().unwrap();
        conn.query_row(
            "SELECT actor_id FROM audit_logs WHERE action = ?1",
            [action],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_trigger_rejects_bad_secret() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (status, body) = get(&state, "/api/cron/backup?secret=wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        let (status, _) = get(&state, "/api/cron/backup").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trigger_skips_when_manual() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (status, body) = get(&state, "/api/cron/backup?secret=s3cret").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skipped"], true);
        assert_eq!(body["reason"], "manual only");
    }

    #[tokio::test]
    async fn test_trigger_runs_export_and_claims_period() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let store = enable_daily(&state).await;

        let (status, body) = get(&state, "/api/cron/backup?secret=s3cret").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let file_name = body["fileName"].as_str().unwrap().to_string();

        let artifact = std::fs::read(state.config.backups_dir.join(&file_name)).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&artifact).unwrap();
        assert_eq!(doc["data"]["clients"].as_array().unwrap().len(), 3);
        assert!(store.get_raw(SettingKey::LastBackupAt).await.unwrap().is_some());

        let (_, again) = get(&state, "/api/cron/backup?secret=s3cret").await;
        assert_eq!(again["skipped"], true);

        let (status, listed) = get(&state, "/api/backups").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["name"], file_name.as_str());
        assert_eq!(audit_actor(&state, "backup.created"), None);
    }

    #[tokio::test]
    async fn test_trigger_reports_export_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.streaming_tables = vec!["missing_table".into()];
        let pool = create_pool(&config.database_path).unwrap();
        migrate(&pool).unwrap();
        let state = Arc::new(AppState::new(pool, config, None));
        let store = enable_daily(&state).await;

        let (status, body) = get(&state, "/api/cron/backup?secret=s3cret").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(store.get_raw(SettingKey::LastBackupAt).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backups_require_actor() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (status, _) = send(&state, Method::GET, "/api/backups", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_artifacts_are_only_served_to_admins() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        enable_daily(&state).await;
        let (_, body) = get(&state, "/api/cron/backup?secret=s3cret").await;
        let file_name = body["fileName"].as_str().unwrap().to_string();

        for uri in [
            format!("/local-storage/backups/{file_name}"),
            format!("/local-storage/{file_name}"),
        ] {
            let (status, bytes) = send(&state, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert!(!String::from_utf8_lossy(&bytes).contains("clients"));
        }

        let uri = format!("/api/backups/{file_name}");
        let (status, bytes) = send(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!String::from_utf8_lossy(&bytes).contains("clients"));
        let (status, _) = send(&state, Method::GET, &uri, Some("member")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, doc) = get(&state, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["data"]["clients"].as_array().unwrap().len(), 3);
        assert_eq!(audit_actor(&state, "backup.downloaded").as_deref(), Some("admin-1"));

        let escape = "/api/backups/..%2Fcrm.db";
        let (status, _) = send(&state, Method::GET, escape, Some("admin")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_manual_backup_bypasses_schedule() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let store = SqliteSettingsStore::new(state.db.clone());

        let (status, _) = send(&state, Method::POST, "/api/backups", Some("member")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Frequency is still manual-only, the export runs anyway.
        let (status, bytes) = send(&state, Method::POST, "/api/backups", Some("admin")).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        let file_name = body["fileName"].as_str().unwrap();

        let (_, listed) = get(&state, "/api/backups").await;
        assert_eq!(listed[0]["name"], file_name);
        assert!(store.get_raw(SettingKey::LastBackupAt).await.unwrap().is_none());
        assert_eq!(audit_actor(&state, "backup.created").as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn test_snapshot_download() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (status, doc) = get(&state, "/api/backups/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["version"], "1.0");
        assert_eq!(doc["data"]["clients"][2]["name"], "c");
        assert_eq!(
            audit_actor(&state, "backup.snapshot_downloaded").as_deref(),
            Some("admin-1")
        );
        assert!(!state.config.backups_dir.exists());
    }
}
