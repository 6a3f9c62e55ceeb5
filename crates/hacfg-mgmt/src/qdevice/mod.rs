//! Quorum device support: certificate handling for the `net` model and the
//! client service on cluster nodes.

pub mod client;
pub mod net;

/// Quorum device models the library knows how to set up.
pub const SUPPORTED_MODELS: &[&str] = &[net::MODEL];
