//! Upload client for the staging sidecar.
//!
//! The stager keeps binaries under the name they were posted with, so the
//! upload always uses the artifact's basename. The working directory is
//! switched to the artifact's folder for the duration of the upload and is
//! put back on every exit path by [`WorkdirGuard`].

use crate::protocol::UPLOAD_FIELD;
use crate::version::user_agent;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use snafu::{OptionExt, ResultExt, Snafu};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Errors raised while transferring an artifact to the stager
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StagerError {
    #[snafu(display("artifact path has no file name: {}", path.display()))]
    NoFileName { path: PathBuf },

    #[snafu(display("cannot determine the current working directory"))]
    CurrentDir { source: std::io::Error },

    #[snafu(display("cannot change working directory to {}", path.display()))]
    ChangeDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("cannot read artifact {file}"))]
    ReadArtifact {
        file: String,
        source: std::io::Error,
    },

    #[snafu(display("upload to {url} failed"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("stager at {url} answered {status}: {body}"))]
    Rejected {
        url: String,
        status: StatusCode,
        body: String,
    },
}

/// Restores the original working directory when dropped
struct WorkdirGuard {
    original: PathBuf,
}

impl WorkdirGuard {
    fn enter(dir: &Path) -> Result<Self, StagerError> {
        let original = std::env::current_dir().context(CurrentDirSnafu)?;
        // A bare filename has an empty parent: stay where we are
        if !dir.as_os_str().is_empty() {
            std::env::set_current_dir(dir).context(ChangeDirSnafu { path: dir })?;
        }
        Ok(Self { original })
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.original) {
            warn!(path = %self.original.display(), error = %e, "failed to restore working directory");
        }
    }
}

/// Post the file at `local_path` to the stager listening at `base_url`.
///
/// Only HTTP 200 counts as success. Any other status is returned as
/// [`StagerError::Rejected`] with the raw response body attached.
pub async fn post_file(local_path: impl AsRef<Path>, base_url: &str) -> Result<(), StagerError> {
    let local_path = local_path.as_ref();
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .context(NoFileNameSnafu { path: local_path })?
        .to_string();
    let dir = local_path.parent().unwrap_or_else(|| Path::new(""));

    let _guard = WorkdirGuard::enter(dir)?;

    let data = tokio::fs::read(&file_name)
        .await
        .context(ReadArtifactSnafu { file: &file_name })?;
    debug!(file = %file_name, bytes = data.len(), "read artifact for upload");

    let part = Part::bytes(data).file_name(file_name.clone());
    let form = Form::new().part(UPLOAD_FIELD, part);

    let response = reqwest::Client::new()
        .post(base_url)
        .header(reqwest::header::USER_AGENT, user_agent())
        .multipart(form)
        .send()
        .await
        .context(RequestSnafu { url: base_url })?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return RejectedSnafu {
            url: base_url,
            status,
            body,
        }
        .fail();
    }
    info!(file = %file_name, url = %base_url, "artifact uploaded to stager");
    Ok(())
}
