//! HTTP side of the stager.
//!
//! Uploads stream into a temporary file inside the root and are renamed over
//! the target once complete. Two deployers posting the same name therefore
//! never interleave bytes; the last finished upload wins.

use crate::config::StagerConfig;
use axum::Router;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use k0ube_c0re_lib::protocol::UPLOAD_FIELD;
use snafu::{OptionExt, ResultExt, Snafu};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared state for the upload handler
pub struct AppState {
    pub root: PathBuf,
}

#[derive(Debug, Snafu)]
pub enum UploadError {
    #[snafu(display("malformed multipart body: {source}"))]
    Multipart { source: MultipartError },

    #[snafu(display("form field '{}' missing", UPLOAD_FIELD))]
    MissingField,

    #[snafu(display("invalid upload file name: {raw:?}"))]
    InvalidFileName { raw: String },

    #[snafu(display("cannot create temporary file in {}: {source}", root.display()))]
    TempFile {
        root: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("cannot write {file}: {source}"))]
    Write {
        file: String,
        source: std::io::Error,
    },

    #[snafu(display("cannot move {file} into place: {source}"))]
    Persist {
        file: String,
        source: std::io::Error,
    },
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadError::Multipart { source } => source.status(),
            UploadError::MissingField | UploadError::InvalidFileName { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "upload failed");
        } else {
            warn!(error = %self, "upload rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// Build the stager router: `POST /` stores, `GET` serves everything under the root.
pub fn router(config: &StagerConfig) -> Router {
    let state = Arc::new(AppState {
        root: config.root.clone(),
    });
    let files = ServeDir::new(&config.root);

    Router::new()
        .route("/", post(upload_file).get_service(files.clone()))
        .fallback_service(files)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reduce a client-supplied file name to a single path component.
///
/// Returns `None` for names that would resolve outside the root or to the
/// root itself.
pub fn sanitize_file_name(raw: &str) -> Option<&str> {
    let name = raw.rsplit(['/', '\\']).next()?;
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<StatusCode, UploadError> {
    while let Some(mut field) = multipart.next_field().await.context(MultipartSnafu)? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "skipping unrelated form field");
            continue;
        }

        let raw = field.file_name().unwrap_or_default().to_string();
        let name = sanitize_file_name(&raw)
            .context(InvalidFileNameSnafu { raw: &raw })?
            .to_string();

        let written = store(&state.root, &name, &mut field).await?;
        info!(file = %name, bytes = written, "upload completed");
        return Ok(StatusCode::OK);
    }

    MissingFieldSnafu.fail()
}

async fn store(root: &Path, name: &str, field: &mut Field<'_>) -> Result<u64, UploadError> {
    let temp = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(root)
        .context(TempFileSnafu { root })?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.context(MultipartSnafu)? {
        file.write_all(&chunk).await.context(WriteSnafu { file: name })?;
        written += chunk.len() as u64;
    }
    file.sync_all().await.context(WriteSnafu { file: name })?;
    drop(file);

    // Dropping the TempPath on failure removes the partial upload
    temp_path
        .persist(root.join(name))
        .map_err(|e| e.error)
        .context(PersistSnafu { file: name })?;
    Ok(written)
}
