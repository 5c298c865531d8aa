use crate::{
    analytics::CollectionStats,
    app::{AppError, AppLocal, LabelUpdate, SearchPage, UploadReport},
    config::Config,
    ingest::Upload,
    photos::{self, ImageRecord},
    search::{SearchError, SearchRequest, SearchResult},
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, path::Path, sync::Arc};
use tokio::signal;

const DEFAULT_SIMILAR_LIMIT: usize = 10;
const DEFAULT_RECENT_DAYS: u32 = 7;

#[derive(Clone)]
struct SharedState {
    app: Arc<AppLocal>,
}

pub fn router(app: Arc<AppLocal>, uploads_path: &Path) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .nest_service(
            "/api/file/",
            tower_http::services::ServeDir::new(uploads_path),
        )
        .route("/api/images/search", post(search))
        .route("/api/images/upload", post(upload))
        .route("/api/images/get", post(get_image))
        .route("/api/images/list", post(list))
        .route("/api/images/labels", post(update_labels))
        .route("/api/images/delete", post(delete))
        .route("/api/images/reprocess", post(reprocess))
        .route("/api/images/similar", post(similar))
        .route("/api/images/recent", post(recent))
        .route("/api/stats", post(stats))
        .route("/api/config", get(get_config))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

async fn start_app(app: AppLocal, uploads_path: &Path) -> anyhow::Result<()> {
    let listen_addr = app.config().listen_addr.clone();
    let router = router(Arc::new(app), uploads_path);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(app: AppLocal, uploads_path: &Path) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app, uploads_path))
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound(_) | AppError::Search(SearchError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Search(SearchError::EmbeddingUnavailable(_)) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Search(_) | AppError::Upload(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Base64(_) => {
                log::error!("{self:?}");
                StatusCode::BAD_REQUEST
            }
            AppError::IO(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchPage>, HttpError> {
    log::debug!("payload: {payload:?}");
    let app = state.app.clone();

    tokio::task::block_in_place(move || app.search(payload).map(Json).map_err(Into::into))
}

#[derive(Deserialize, Serialize)]
pub struct UploadFile {
    pub file_name: String,
    pub data_b64: String,
}

impl Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UploadFile {{ file_name: {:?}, data_b64: [REDACTED] }}",
            self.file_name
        )
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
    /// Comma separated labels applied to every file
    #[serde(default)]
    pub labels: Option<String>,
}

async fn upload(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadReport>, HttpError> {
    log::debug!("payload: {payload:?}");

    let uploads = payload
        .files
        .into_iter()
        .map(|file| -> Result<Upload, AppError> {
            Ok(Upload {
                file_name: file.file_name,
                bytes: STANDARD.decode(file.data_b64)?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    let labels = payload
        .labels
        .as_deref()
        .map(photos::parse_labels)
        .unwrap_or_default();

    let app = state.app.clone();
    tokio::task::block_in_place(move || {
        app.upload(&uploads, &labels)
            .map(Json)
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IdRequest {
    pub id: u64,
}

async fn get_image(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<IdRequest>,
) -> Result<Json<ImageRecord>, HttpError> {
    Ok(Json(state.app.get(payload.id)?))
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ListRequest {
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub total: usize,
    pub images: Vec<ImageRecord>,
}

async fn list(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<ListRequest>>,
) -> Json<ListResponse> {
    let Json(payload) = payload.unwrap_or_default();

    Json(ListResponse {
        total: state.app.total(),
        images: state.app.list(payload.limit, payload.offset),
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LabelsRequest {
    pub id: u64,
    #[serde(flatten)]
    pub update: LabelUpdate,
}

async fn update_labels(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<LabelsRequest>,
) -> Result<Json<ImageRecord>, HttpError> {
    log::debug!("payload: {payload:?}");
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        app.update_labels(payload.id, payload.update)
            .map(Json)
            .map_err(Into::into)
    })
}

async fn delete(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<IdRequest>,
) -> Result<Json<ImageRecord>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || app.delete(payload.id).map(Json).map_err(Into::into))
}

async fn reprocess(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<IdRequest>,
) -> Result<Json<ImageRecord>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || app.reprocess(payload.id).map(Json).map_err(Into::into))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SimilarRequest {
    pub id: u64,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SimilarHit {
    #[serde(flatten)]
    pub result: SearchResult,
    pub image: ImageRecord,
}

async fn similar(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SimilarRequest>,
) -> Result<Json<Vec<SimilarHit>>, HttpError> {
    let limit = payload.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    let hits = state
        .app
        .similar(payload.id, limit)?
        .into_iter()
        .map(|(result, image)| SimilarHit { result, image })
        .collect();

    Ok(Json(hits))
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RecentRequest {
    pub days: Option<u32>,
}

async fn recent(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<RecentRequest>>,
) -> Json<Vec<ImageRecord>> {
    let Json(payload) = payload.unwrap_or_default();
    Json(state.app.recent(payload.days.unwrap_or(DEFAULT_RECENT_DAYS)))
}

async fn stats(State(state): State<Arc<SharedState>>) -> Json<CollectionStats> {
    Json(state.app.stats())
}

async fn get_config(State(state): State<Arc<SharedState>>) -> Json<Config> {
    Json(state.app.config().clone())
}
