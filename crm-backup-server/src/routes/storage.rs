use crate::error::AppError;
use crate::routes::actor::RequestActor;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use crm_storage::files::{AccessUrl, Backend, Listing};
use crm_storage::quota::{QuotaConfig, StorageUsage};
use crm_storage::remote::BatchDeleteResult;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/usage", get(get_usage))
        .route("/config", get(get_config).put(update_config))
        .route("/{backend}/list", get(list))
        .route("/{backend}/folders", post(create_folder))
        .route("/{backend}/entries", delete(delete_entry))
        .route("/{backend}/delete-many", post(delete_many))
        .route("/{backend}/rename", post(rename))
        .route("/{backend}/url", get(access_url))
        .route("/{backend}/files", put(save_file))
}

fn remote_only(backend: Backend, operation: &str) -> Result<(), AppError> {
    match backend {
        Backend::Remote => Ok(()),
        Backend::Local => Err(AppError::BadRequest(format!(
            "{operation} is only available for remote storage"
        ))),
    }
}

// ── Quota ──

async fn get_usage(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Result<Json<StorageUsage>, AppError> {
    actor.require_admin()?;
    Ok(Json(state.quota.get_usage().await))
}

async fn get_config(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Result<Json<QuotaConfig>, AppError> {
    actor.require_admin()?;
    Ok(Json(state.quota.config().await))
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(config): Json<QuotaConfig>,
) -> Result<Json<QuotaConfig>, AppError> {
    Ok(Json(state.quota.update_config(&actor, config).await?))
}

// ── Files ──

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    prefix: String,
}

async fn list(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(state.files.list(&actor, backend, &query.prefix).await?))
}

#[derive(Deserialize)]
struct FolderBody {
    path: String,
}

async fn create_folder(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Json(body): Json<FolderBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let path = state.files.create_folder(&actor, backend, &body.path).await?;
    Ok(Json(json!({ "success": true, "path": path })))
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Query(query): Query<PathQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.files.delete(&actor, backend, &query.path).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct DeleteManyBody {
    paths: Vec<String>,
}

async fn delete_many(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Json(body): Json<DeleteManyBody>,
) -> Result<Json<BatchDeleteResult>, AppError> {
    Ok(Json(state.files.delete_many(&actor, backend, &body.paths).await?))
}

#[derive(Deserialize)]
struct RenameBody {
    from: String,
    to: String,
}

async fn rename(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Json(body): Json<RenameBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    remote_only(backend, "rename")?;
    state.files.rename_remote(&actor, &body.from, &body.to).await?;
    Ok(Json(json!({ "success": true, "path": body.to })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UrlQuery {
    key: String,
    expires_in: Option<u64>,
}

async fn access_url(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<AccessUrl>, AppError> {
    remote_only(backend, "signed URLs")?;
    let expires_in = query.expires_in.map(Duration::from_secs);
    Ok(Json(state.files.remote_access_url(&actor, &query.key, expires_in).await?))
}

async fn save_file(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(backend): Path<Backend>,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    if backend != Backend::Local {
        return Err(AppError::BadRequest("file upload is only available for local storage".into()));
    }
    let path = state.files.save_local_file(&actor, &query.path, &body).await?;
    Ok(Json(json!({ "success": true, "path": path, "url": format!("/local-storage/{path}") })))
}
