//! HTTP API / HTTP 接口
//!
//! Thin axum router over the index builders and the search engine. Handlers
//! never panic on bad indices or unreachable servers; failures come back in
//! the response body.

use crate::config::IndexPolicy;
use crate::error::ScanResult;
use crate::index::store::{load_json_or_default, recipe_index_path, RecipeIndexDoc};
use crate::index::{recipe, scan};
use crate::models::{SearchFilters, SourceConfig, SourceRole};
use crate::search::engine::{self, SearchResult};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state / 应用共享状态
pub struct AppState {
    pub sources: Vec<SourceConfig>,
    pub out_dir: PathBuf,
    pub policy: IndexPolicy,
}

/// Uniform response wrapper / 统一响应包装
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            code: 500,
            message: message.to_string(),
            data: None,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/servers", get(list_servers))
        .route("/v1/index/status", get(index_status))
        .route("/v1/search/cache", post(search_cache))
        .route("/v1/search/direct", post(search_direct))
        .route("/v1/index/bootstrap", post(scan_bootstrap))
        .route("/v1/index/update", post(scan_update))
        .route("/v1/recipes/bootstrap", post(recipe_bootstrap))
        .route("/v1/recipes/update", post(recipe_update))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Public view of a source, credentials withheld / 数据源公开视图
#[derive(Debug, Serialize)]
struct ServerInfo {
    name: String,
    address: String,
    port: u16,
    role: String,
    group: String,
    root: String,
    local: bool,
}

async fn list_servers(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<ServerInfo>>> {
    let servers = state
        .sources
        .iter()
        .map(|c| ServerInfo {
            name: c.name.clone(),
            address: c.address.clone(),
            port: c.port,
            role: c.role.as_str().to_string(),
            group: c.group.clone(),
            root: c.root.clone(),
            local: c.use_local_fs,
        })
        .collect();
    Json(ApiResponse::success(servers))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SourceStatus {
    Scan(scan::ScanStatus),
    Recipe {
        server: String,
        folders: usize,
        recipes: usize,
        generated_at: Option<String>,
        updated_at: Option<String>,
    },
    Error {
        server: String,
        error: String,
    },
}

async fn index_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<SourceStatus>>> {
    let mut out = Vec::new();
    for cfg in &state.sources {
        let entry = match cfg.role {
            SourceRole::Scan => match scan::scan_status(cfg, &state.out_dir) {
                Ok(s) => SourceStatus::Scan(s),
                Err(e) => SourceStatus::Error {
                    server: cfg.name.clone(),
                    error: e.to_string(),
                },
            },
            SourceRole::Recipe => {
                match load_json_or_default::<RecipeIndexDoc>(&recipe_index_path(
                    &state.out_dir,
                    &cfg.name,
                )) {
                    Ok(doc) => SourceStatus::Recipe {
                        server: cfg.name.clone(),
                        folders: doc.stats.folders,
                        recipes: doc.stats.recipes,
                        generated_at: doc.generated_at,
                        updated_at: doc.updated_at,
                    },
                    Err(e) => SourceStatus::Error {
                        server: cfg.name.clone(),
                        error: e.to_string(),
                    },
                }
            }
        };
        out.push(entry);
    }
    Json(ApiResponse::success(out))
}

async fn search_cache(
    State(state): State<Arc<AppState>>,
    Json(filters): Json<SearchFilters>,
) -> Json<ApiResponse<SearchResult>> {
    match engine::search_cache(&state.sources, filters, &state.out_dir).await {
        Ok(res) => Json(ApiResponse::success(res)),
        Err(e) => Json(ApiResponse::error(&e.to_string())),
    }
}

async fn search_direct(
    State(state): State<Arc<AppState>>,
    Json(filters): Json<SearchFilters>,
) -> Json<ApiResponse<SearchResult>> {
    match engine::search_direct(&state.sources, filters, &state.out_dir, &state.policy).await {
        Ok(res) => Json(ApiResponse::success(res)),
        Err(e) => Json(ApiResponse::error(&e.to_string())),
    }
}

/// Build request: restrict to named servers, empty means all of that role.
#[derive(Debug, Default, Deserialize)]
struct BuildRequest {
    #[serde(default)]
    servers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ScanOutcome {
    server: String,
    status: String,
    #[serde(flatten)]
    summary: scan::ScanSummary,
}

#[derive(Debug, Serialize)]
struct RecipeOutcome {
    server: String,
    status: String,
    #[serde(flatten)]
    summary: recipe::RecipeSummary,
}

#[derive(Debug, Serialize)]
struct ErrorOutcome {
    server: String,
    status: String,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BuildOutcome {
    Scan(ScanOutcome),
    Recipe(RecipeOutcome),
    Error(ErrorOutcome),
}

fn selected<'a>(
    state: &'a AppState,
    req: &BuildRequest,
    role: SourceRole,
) -> Vec<&'a SourceConfig> {
    state
        .sources
        .iter()
        .filter(|c| c.role == role)
        .filter(|c| {
            req.servers.is_empty()
                || req
                    .servers
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(&c.name) || s.eq_ignore_ascii_case(&c.group))
        })
        .collect()
}

async fn run_scan_build(
    state: Arc<AppState>,
    req: BuildRequest,
    incremental: bool,
) -> Vec<BuildOutcome> {
    let mut out = Vec::new();
    for cfg in selected(&state, &req, SourceRole::Scan) {
        let res: ScanResult<scan::ScanSummary> =
            scan::build(cfg, &state.out_dir, &state.policy, incremental).await;
        out.push(match res {
            Ok(summary) => BuildOutcome::Scan(ScanOutcome {
                server: cfg.name.clone(),
                status: "ok".to_string(),
                summary,
            }),
            Err(e) => BuildOutcome::Error(ErrorOutcome {
                server: cfg.name.clone(),
                status: "error".to_string(),
                message: e.to_string(),
            }),
        });
    }
    out
}

async fn run_recipe_build(
    state: Arc<AppState>,
    req: BuildRequest,
    incremental: bool,
) -> Vec<BuildOutcome> {
    let mut out = Vec::new();
    for cfg in selected(&state, &req, SourceRole::Recipe) {
        let res: ScanResult<recipe::RecipeSummary> =
            recipe::build(cfg, &state.out_dir, &state.policy, incremental).await;
        out.push(match res {
            Ok(summary) => BuildOutcome::Recipe(RecipeOutcome {
                server: cfg.name.clone(),
                status: "ok".to_string(),
                summary,
            }),
            Err(e) => BuildOutcome::Error(ErrorOutcome {
                server: cfg.name.clone(),
                status: "error".to_string(),
                message: e.to_string(),
            }),
        });
    }
    out
}

async fn scan_bootstrap(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildRequest>,
) -> Json<ApiResponse<Vec<BuildOutcome>>> {
    Json(ApiResponse::success(run_scan_build(state, req, false).await))
}

async fn scan_update(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildRequest>,
) -> Json<ApiResponse<Vec<BuildOutcome>>> {
    Json(ApiResponse::success(run_scan_build(state, req, true).await))
}

async fn recipe_bootstrap(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildRequest>,
) -> Json<ApiResponse<Vec<BuildOutcome>>> {
    Json(ApiResponse::success(
        run_recipe_build(state, req, false).await,
    ))
}

async fn recipe_update(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildRequest>,
) -> Json<ApiResponse<Vec<BuildOutcome>>> {
    Json(ApiResponse::success(
        run_recipe_build(state, req, true).await,
    ))
}
