//! Error types for the virtual texture streaming core.

use thiserror::Error;

/// Errors surfaced at the `lunaris-vt` crate boundary.
///
/// Per-page load failures are *not* represented here: a missing or
/// corrupt page file is a recoverable, per-request event handled by
/// [`crate::manager::PageManager`] via the failure queue (see
/// [`crate::loader::LoadFailure`]), not a function-call error. `VtError`
/// is reserved for construction-time and GPU-resource failures.
#[derive(Error, Debug)]
pub enum VtError {
    /// An invalid [`crate::config::VtConfig`] was supplied.
    #[error("invalid virtual texture config: {0}")]
    Config(String),

    /// GPU texture or device interaction failed.
    #[error("GPU error: {0}")]
    Gpu(String),

    /// I/O error unrelated to a specific page load (e.g. reading the
    /// page-source directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`VtError`].
pub type Result<T> = std::result::Result<T, VtError>;
