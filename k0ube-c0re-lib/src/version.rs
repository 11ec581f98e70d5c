//! 🤓 Single source of truth for the k0ube version string

/// Version of the k0ube workspace, as compiled into every crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent sent by k0ube HTTP clients
pub fn user_agent() -> String {
    format!("k0ube/{VERSION}")
}
