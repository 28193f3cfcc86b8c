//! Design-time configuration for the virtual texture system.

use crate::error::{Result, VtError};

/// Enumerated configuration for a virtual texture instance.
///
/// All fields are the design-time constants from the system's external
/// configuration contract: the logical image size, the page grid, the
/// atlas it streams into, and the pinned-tier floor. Everything else
/// (`pages_per_edge`, `lods`, `slot_size`, `atlas_size`) is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtConfig {
    /// Logical image dimensions in pixels (square).
    pub virtual_size: u32,
    /// Pixels per page, per edge.
    pub page_size: u32,
    /// Pixels of gutter per side of a page in the atlas.
    pub page_padding: u32,
    /// Atlas grid dimensions, in slots per axis.
    pub atlas_slots: u32,
    /// All mip levels `>= this value` are pinned and never evicted.
    pub min_pinned_lod: u32,
}

impl Default for VtConfig {
    fn default() -> Self {
        Self {
            virtual_size: 8192,
            page_size: 512,
            page_padding: 4,
            atlas_slots: 8,
            min_pinned_lod: 4,
        }
    }
}

impl VtConfig {
    /// Number of pages along one edge of the virtual texture at mip 0.
    #[must_use]
    pub const fn pages_per_edge(&self) -> u32 {
        self.virtual_size / self.page_size
    }

    /// Number of mip levels, `L`, such that the coarsest level is 1x1.
    ///
    /// `L = floor(log2(pages_per_edge)) + 1`.
    #[must_use]
    pub fn lods(&self) -> u32 {
        self.pages_per_edge().ilog2() + 1
    }

    /// Pixels per atlas slot, including padding on both sides.
    #[must_use]
    pub const fn slot_size(&self) -> u32 {
        self.page_size + 2 * self.page_padding
    }

    /// Total atlas texture size in pixels, per edge.
    #[must_use]
    pub const fn atlas_size(&self) -> u32 {
        self.slot_size() * self.atlas_slots
    }

    /// Total number of physical slots in the atlas.
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        (self.atlas_slots * self.atlas_slots) as usize
    }

    /// Dimensions `(pages_x, pages_y)` of the page grid at a given mip.
    ///
    /// Each dimension halves (flooring) per level, clamped to a minimum
    /// of 1, so the coarsest level is always `1x1`.
    #[must_use]
    pub fn dims_at_lod(&self, lod: u32) -> (u32, u32) {
        let edge = (self.pages_per_edge() >> lod).max(1);
        (edge, edge)
    }

    /// Validate the configuration, returning an error describing the
    /// first invalid field found.
    ///
    /// # Errors
    ///
    /// Returns [`VtError::Config`] if any field is zero, if
    /// `virtual_size` is not a multiple of `page_size`, if
    /// `pages_per_edge` is not a power of two, or if `min_pinned_lod`
    /// does not leave at least one pinned (coarsest) level.
    pub fn validate(&self) -> Result<()> {
        if self.virtual_size == 0 || self.page_size == 0 || self.atlas_slots == 0 {
            return Err(VtError::Config(
                "virtual_size, page_size, and atlas_slots must be non-zero".into(),
            ));
        }
        if self.virtual_size % self.page_size != 0 {
            return Err(VtError::Config(
                "virtual_size must be a multiple of page_size".into(),
            ));
        }
        let pages_per_edge = self.pages_per_edge();
        if !pages_per_edge.is_power_of_two() {
            return Err(VtError::Config(
                "virtual_size / page_size must be a power of two".into(),
            ));
        }
        if self.min_pinned_lod >= self.lods() {
            return Err(VtError::Config(format!(
                "min_pinned_lod ({}) must be less than lods ({})",
                self.min_pinned_lod,
                self.lods()
            )));
        }
        Ok(())
    }
}
