//! HTTP routes for listing, uploading, reading, and deleting books.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use epub_reader_core::error::{ErrorStatus, LibraryError};
use epub_reader_core::ingest::{IngestReport, IngestSource};
use epub_reader_core::library::{BookSummary, ChapterView, Health, Library};

use crate::AppState;

/// Images are content-addressed within a book, so they never change under a name.
const IMAGE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Stored SVG is served from our own origin; opened directly it must not run script.
const IMAGE_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; sandbox";

/// Query params for PUT /api/books
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes();
    Router::new()
        .route("/health", get(health))
        .route("/api/books", get(list_books).put(upload_book))
        .route("/api/books/{id}", axum::routing::delete(delete_book))
        .route("/api/books/{id}/chapters/{index}", get(get_chapter))
        .route("/api/books/{id}/images/{name}", get(get_image))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

/// Run a blocking library call on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Library) -> Result<T, LibraryError> + Send + 'static,
    T: Send + 'static,
{
    let library = state.library.clone();
    tokio::task::spawn_blocking(move || f(&library))
        .await
        .map_err(|e| ApiError::Join(e.to_string()))?
        .map_err(ApiError::Library)
}

async fn health(State(state): State<AppState>) -> Result<Json<Health>, ApiError> {
    let health = blocking(&state, |library| Ok(library.health())).await?;
    Ok(Json(health))
}

async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<BookSummary>>, ApiError> {
    let books = blocking(&state, |library| library.list_books()).await?;
    Ok(Json(books))
}

async fn upload_book(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<IngestReport>, ApiError> {
    let name = q
        .filename
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("filename query parameter is required".to_string()))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }
    tracing::info!("Upload {} ({} bytes)", name, body.len());
    let source = IngestSource::Bytes {
        name,
        data: body.to_vec(),
    };
    let report = blocking(&state, move |library| library.ingest(source)).await?;
    Ok(Json(report))
}

async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(&state, move |library| library.delete_book(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_chapter(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, String)>,
) -> Result<Json<ChapterView>, ApiError> {
    let view = blocking(&state, move |library| library.get_chapter(&id, &index)).await?;
    Ok(Json(view))
}

async fn get_image(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let image = blocking(&state, move |library| library.get_image(&id, &name)).await?;
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(image.mime_type)),
        (header::CACHE_CONTROL, HeaderValue::from_static(IMAGE_CACHE_CONTROL)),
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(IMAGE_CSP)),
    ];
    Ok((headers, image.bytes).into_response())
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Debug)]
enum ApiError {
    Library(LibraryError),
    BadRequest(String),
    Join(String),
}

fn status_code(status: ErrorStatus) -> StatusCode {
    match status {
        ErrorStatus::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorStatus::PathTraversal => StatusCode::FORBIDDEN,
        ErrorStatus::NotFound => StatusCode::NOT_FOUND,
        ErrorStatus::MalformedInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorStatus::IncompatibleFormat => StatusCode::CONFLICT,
        ErrorStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Library(e) => {
                let status = e.status();
                if status == ErrorStatus::Internal {
                    tracing::error!("{}", e);
                } else {
                    tracing::debug!("Rejected request: {}", e);
                }
                (status_code(status), status.code(), e.to_string())
            }
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, ErrorStatus::InvalidRequest.code(), m),
            ApiError::Join(m) => {
                tracing::error!("Blocking task failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorStatus::Internal.code(), m)
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Library(e) => write!(f, "{}", e),
            ApiError::BadRequest(s) => write!(f, "bad request: {}", s),
            ApiError::Join(s) => write!(f, "task failed: {}", s),
        }
    }
}
