//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/projects` | Create a project, returns its API key |
//! | `POST` | `/v1/documents` | Register a document by content hash |
//! | `PUT`  | `/v1/documents/{id}/upload` | Upload raw bytes |
//! | `POST` | `/v1/documents/{id}/complete` | Finish upload, start processing |
//! | `GET`  | `/v1/documents/{id}` | Poll document status |
//! | `DELETE` | `/v1/documents/{id}` | Delete a document and derived state |
//! | `POST` | `/v1/query` | Hybrid search / answer |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! All routes except project creation and health require a
//! `Authorization: Bearer <api_key>` header resolving to a project;
//! every document and query operation is scoped to that project.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Upload body is empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `invalid_state` (409), `upstream_error` (502), `consistency_error` and
//! `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docvault_core::chunk::ChunkingParams;
use docvault_core::error::EngineError;
use docvault_core::models::{Document, Project};
use docvault_core::services::Embedder;
use docvault_core::store::Store;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::dedup::SqliteDedupCache;
use crate::embedding::{create_embedder, DisabledEmbedder};
use crate::extractor::create_extractor;
use crate::ingest::Ingestor;
use crate::pipeline::{run_worker, Pipeline};
use crate::query::{QueryEngine, QueryParams};
use crate::queue::JobQueue;
use crate::sqlite_store::SqliteStore;
use crate::vector_index::SqliteVectorIndex;
use crate::{answer, db, migrate};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ingestor: Arc<Ingestor>,
    pub query_engine: Arc<QueryEngine>,
}

/// Run migrations, start the queue workers, and serve the API until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));
    let blobs = Arc::new(FsBlobStore::new(&config.blobs.root));
    let vectors = Arc::new(SqliteVectorIndex::new(pool.clone()));
    let dedup = Arc::new(SqliteDedupCache::new(pool));

    let embedder: Arc<dyn Embedder> = match create_embedder(&config.embedding)? {
        Some(embedder) => Arc::from(embedder),
        None => Arc::new(DisabledEmbedder),
    };
    let extractor = Arc::from(create_extractor(&config.extraction)?);
    let answerer = answer::create_answerer(&config.answer)?.map(Arc::from);

    let queue = JobQueue::new(config.queue.max_attempts, config.queue.backoff_cap_secs);

    let pipeline = Arc::new(Pipeline {
        store: Arc::clone(&store),
        blobs: blobs.clone(),
        vectors: vectors.clone(),
        dedup: dedup.clone(),
        extractor,
        embedder: Arc::clone(&embedder),
        chunking: ChunkingParams {
            window_chars: config.chunking.window_chars,
            overlap_chars: config.chunking.overlap_chars,
            max_keywords: config.chunking.max_keywords,
        },
        dedup_ttl_secs: config.dedup.ttl_secs,
    });

    for _ in 0..config.queue.workers.max(1) {
        tokio::spawn(run_worker(Arc::clone(&pipeline), Arc::clone(&queue)));
    }

    let state = AppState {
        store: Arc::clone(&store),
        ingestor: Arc::new(Ingestor {
            store: Arc::clone(&store),
            blobs: blobs.clone(),
            vectors: vectors.clone(),
            dedup,
            queue,
            dedup_ttl_secs: config.dedup.ttl_secs,
        }),
        query_engine: Arc::new(QueryEngine {
            store,
            blobs,
            vectors,
            embedder,
            answerer,
            retrieval: config.retrieval.clone(),
            max_keywords: config.chunking.max_keywords,
        }),
    };

    let app = build_router(state, config.server.max_upload_bytes);

    tracing::info!(bind = %config.server.bind, "server listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/projects", post(handle_create_project))
        .route("/v1/documents", post(handle_create_document))
        .route("/v1/documents/{id}/upload", put(handle_upload))
        .route("/v1/documents/{id}/complete", post(handle_complete))
        .route(
            "/v1/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/v1/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            EngineError::Consistency(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %e, "request failed");
        }
        AppError {
            status,
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "Missing or invalid API key".to_string(),
    }
}

/// Resolve the bearer API key to a project.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Project, AppError> {
    let api_key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(unauthorized)?;

    state
        .store
        .project_by_api_key(api_key)
        .await
        .map_err(|e| AppError::from(EngineError::Internal(e)))?
        .ok_or_else(unauthorized)
}

// ============ Request/response bodies ============

#[derive(Deserialize)]
struct CreateProjectRequest {
    name: String,
}

#[derive(Serialize)]
struct ProjectResponse {
    id: String,
    name: String,
    api_key: String,
}

#[derive(Deserialize)]
struct CreateDocumentRequest {
    name: String,
    content_type: String,
    content_hash: String,
}

#[derive(Serialize)]
struct CreateDocumentResponse {
    document_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_path: Option<String>,
    deduped: bool,
    instant: bool,
}

#[derive(Serialize)]
struct DocumentView {
    id: String,
    name: String,
    content_type: String,
    status: &'static str,
    chunk_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    deduped_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<Document> for DocumentView {
    fn from(doc: Document) -> Self {
        DocumentView {
            id: doc.id,
            name: doc.name,
            content_type: doc.content_type,
            status: doc.status.as_str(),
            chunk_count: doc.chunk_count,
            deduped_from: doc.deduped_from,
            error: doc.error,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    top_k: Option<i64>,
    mode: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ============ Handlers ============

async fn handle_create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), AppError> {
    let project = state.ingestor.create_project(&req.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            id: project.id,
            name: project.name,
            api_key: project.api_key,
        }),
    ))
}

async fn handle_create_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreateDocumentResponse>), AppError> {
    let project = authorize(&state, &headers).await?;
    let outcome = state
        .ingestor
        .create_document(&project, &req.name, &req.content_type, &req.content_hash)
        .await?;

    let doc = outcome.document;
    let upload_path = if outcome.deduped {
        None
    } else {
        Some(format!("/v1/documents/{}/upload", doc.id))
    };
    let status = if outcome.deduped { StatusCode::OK } else { StatusCode::CREATED };
    Ok((
        status,
        Json(CreateDocumentResponse {
            document_id: doc.id,
            status: doc.status.as_str(),
            upload_path,
            deduped: outcome.deduped,
            instant: outcome.instant,
        }),
    ))
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DocumentView>, AppError> {
    let project = authorize(&state, &headers).await?;
    let doc = state.ingestor.upload(&project, &id, &body).await?;
    Ok(Json(doc.into()))
}

async fn handle_complete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<DocumentView>), AppError> {
    let project = authorize(&state, &headers).await?;
    let doc = state.ingestor.complete_upload(&project, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(doc.into())))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DocumentView>, AppError> {
    let project = authorize(&state, &headers).await?;
    let doc = state.ingestor.get_document(&project, &id).await?;
    Ok(Json(doc.into()))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let project = authorize(&state, &headers).await?;
    state.ingestor.delete_document(&project, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let project = authorize(&state, &headers).await?;
    let response = state
        .query_engine
        .query(
            &project,
            &QueryParams {
                query: req.query,
                top_k: req.top_k,
                mode: req.mode,
            },
        )
        .await?;
    Ok(Json(response).into_response())
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
