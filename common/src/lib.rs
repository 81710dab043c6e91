//! Common code shared between `cam_classifier` and `asset_cache`.
pub mod config;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
