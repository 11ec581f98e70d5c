//! # k0ube-c0re-lib
//!
//! Shared pieces of the k0ube ecosystem: the version, the wire contract between
//! the deployer and the staging sidecar, and the client that uploads binaries
//! to that sidecar.

pub mod protocol;
pub mod stager;
pub mod version;

pub use stager::{StagerError, post_file};
