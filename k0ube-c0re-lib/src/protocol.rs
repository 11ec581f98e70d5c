//! Wire contract shared by the deployer and the staging sidecar.
//!
//! The deployer never talks to a registry. It posts the compiled binary to the
//! stager, then points the workload's install step at the stager's GET side.
//! Both ends must agree on the names below.

/// Multipart form field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "uploadfile";

/// Well-known name of the stager `Service` the deployer discovers.
pub const STAGER_SERVICE_NAME: &str = "k0ube-stager";

/// Namespace the stager `Service` lives in.
pub const STAGER_NAMESPACE: &str = "default";

/// Port the stager listens on inside the cluster.
pub const STAGER_PORT: u16 = 80;

/// Join a staging base URL and an artifact name into the download URL.
///
/// Trailing slashes on the base are ignored so `http://host:30000/` and
/// `http://host:30000` give the same result.
pub fn artifact_url(base_url: &str, artifact_name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), artifact_name)
}
