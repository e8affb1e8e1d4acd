//! Common code shared between `distraction_server` and `status_watcher`.
pub mod status;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
