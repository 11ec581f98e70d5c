//! # k0ube-stager
//!
//! The staging sidecar workloads fetch their own binary from. `GET` serves a
//! static file tree, `POST /` stores a multipart upload under that tree.

pub mod config;
pub mod server;

pub use config::StagerConfig;
pub use server::{router, sanitize_file_name};
