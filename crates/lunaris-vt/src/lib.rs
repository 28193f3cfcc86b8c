//! # Lunaris Virtual Texture
//!
//! Virtual texture page streaming core for the Lunaris Game Engine.
//!
//! A residency manager that maps a large virtual texture, tiled into
//! fixed-size pages across a mip pyramid, onto a small physical atlas,
//! driven by GPU feedback read back from the previous frame. Five
//! pieces cooperate on the render thread plus a small worker pool:
//!
//! - [`feedback`]: decodes the raw feedback buffer into requested pages.
//! - [`cache`]: an LRU-by-slot residency cache over the physical atlas.
//! - [`page_table`]: the bit-packed page-table mips and their GPU mirror.
//! - [`loader`]: a thread-pool-backed async page image decoder.
//! - [`manager`]: orchestrates the four above into one frame step.
//!
//! [`PageManager`] is the crate's single entry point; everything else is
//! exposed for testing and for callers who need finer-grained control.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod atlas;
pub mod cache;
pub mod config;
pub mod error;
pub mod feedback;
pub mod loader;
pub mod manager;
pub mod page_table;
pub mod request;

pub use config::VtConfig;
pub use error::{Result, VtError};
pub use manager::PageManager;
pub use request::{PageRequest, PageSlot};

/// Lunaris virtual texture crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for standalone use of this crate.
///
/// Engine integrations that already called [`lunaris_core::init`] do not
/// need this; it exists so the crate's own examples and tools can run
/// without pulling in all of `lunaris-core`.
///
/// # Errors
///
/// Returns an error if a global tracing subscriber is already installed.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init()
        .map_err(|e| VtError::Config(e.to_string()))?;

    tracing::info!("lunaris-vt v{VERSION} initialized");
    Ok(())
}
