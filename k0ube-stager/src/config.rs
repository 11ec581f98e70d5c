//! Stager configuration, from flags or `K0UBE_STAGER_*` environment variables

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default cap on a single upload: 512 MiB is plenty for a static binary
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "k0ube-stager", version, about = "Serve and receive k0ube workload binaries")]
pub struct StagerConfig {
    /// Directory uploads are written to and served from
    #[arg(long, env = "K0UBE_STAGER_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Address to listen on
    #[arg(long, env = "K0UBE_STAGER_LISTEN", default_value = "0.0.0.0:80")]
    pub listen: SocketAddr,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "K0UBE_STAGER_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

impl StagerConfig {
    /// Config rooted at `root`, other values at their defaults
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            listen: SocketAddr::from(([0, 0, 0, 0], k0ube_c0re_lib::protocol::STAGER_PORT)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
