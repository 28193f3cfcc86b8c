//! CPU-side page tables and their mirrored GPU (`R32Uint`) texture.

use std::sync::Arc;

use crate::request::{PageRequest, PageSlot};

/// Encode a resident page-table entry for `slot`.
///
/// Bit layout (normative): bit 0 = valid, bits 1..8 = `slot.x`,
/// bits 9..16 = `slot.y`, bits 17..31 reserved (zero).
#[must_use]
pub const fn encode_entry(slot: PageSlot) -> u32 {
    1 | ((slot.x & 0xFF) << 1) | ((slot.y & 0xFF) << 9)
}

/// Decode the validity bit of a page-table entry.
#[must_use]
pub const fn entry_is_valid(entry: u32) -> bool {
    entry & 1 == 1
}

/// Decode the slot a resident entry points to.
///
/// Returns `None` if the entry's valid bit is unset.
#[must_use]
pub const fn decode_entry(entry: u32) -> Option<PageSlot> {
    if !entry_is_valid(entry) {
        return None;
    }
    let x = (entry >> 1) & 0xFF;
    let y = (entry >> 9) & 0xFF;
    Some(PageSlot::new(x, y))
}

/// One CPU-side mip level of the page table: a flat `pages_x * pages_y`
/// row-major `u32` grid.
struct Level {
    pages_x: u32,
    pages_y: u32,
    entries: Vec<u32>,
}

impl Level {
    fn new(pages_x: u32, pages_y: u32) -> Self {
        Self {
            pages_x,
            pages_y,
            entries: vec![0; (pages_x * pages_y) as usize],
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.pages_x || y as u32 >= self.pages_y {
            return None;
        }
        Some((y as u32 * self.pages_x + x as u32) as usize)
    }
}

/// The pure CPU-side page-table data: one grid per mip level.
///
/// Kept free of any `wgpu` type so the bit-packed-entry bookkeeping
/// (`spec.md` §4.3, §8 scenario S6) — and the orchestration logic in
/// `crate::manager::ManagerCore` that drives it — is testable without a
/// `wgpu::Device`, the same way `lunaris-renderer::gpu::GraphicsContext`'s
/// device-bound parts aren't unit tested but its config types are. See
/// [`PageTableTexture`] for the GPU mirror built from this grid.
///
/// Construction computes `L` by repeatedly halving `(pages_x, pages_y)`
/// (flooring, clamped to 1) until both reach 1, pushing a zero-filled
/// grid at each step; the coarsest mip is always `1x1`.
pub struct PageTableLevels {
    levels: Vec<Level>,
}

impl PageTableLevels {
    /// Build the mip chain for a base `(pages_x, pages_y)` grid.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[must_use]
    pub fn new(pages_x: u32, pages_y: u32) -> Self {
        assert!(
            pages_x > 0 && pages_y > 0,
            "page table base dimensions must be non-zero"
        );

        let mut levels = Vec::new();
        let (mut x, mut y) = (pages_x, pages_y);
        loop {
            levels.push(Level::new(x, y));
            if x == 1 && y == 1 {
                break;
            }
            x = (x / 2).max(1);
            y = (y / 2).max(1);
        }

        Self { levels }
    }

    /// Number of mip levels, `L`.
    #[must_use]
    pub fn lods(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Dimensions of mip `lod`, if it exists.
    #[must_use]
    pub fn dims(&self, lod: u32) -> Option<(u32, u32)> {
        self.levels.get(lod as usize).map(|l| (l.pages_x, l.pages_y))
    }

    /// Set the entry for `request` to `entry`.
    ///
    /// Out-of-range `lod` is a silent no-op (defensive, per `spec.md`
    /// §4.3): feedback with a bogus mip should never be able to panic
    /// the render thread. Out-of-range `(x, y)` within a valid `lod` is
    /// a programmer error and is also a no-op, since only the caller
    /// (the page manager) produces in-range coordinates per level.
    pub fn write(&mut self, request: PageRequest, entry: u32) {
        let Some(level) = self.levels.get_mut(request.lod as usize) else {
            return;
        };
        if let Some(idx) = level.index(request.x, request.y) {
            level.entries[idx] = entry;
        }
    }

    /// Whether `request`'s entry has its valid bit set.
    #[must_use]
    pub fn is_resident(&self, request: PageRequest) -> bool {
        self.levels
            .get(request.lod as usize)
            .and_then(|level| level.index(request.x, request.y).map(|idx| level.entries[idx]))
            .is_some_and(entry_is_valid)
    }

    fn entries(&self, lod: usize) -> &[u32] {
        &self.levels[lod].entries
    }
}

/// The GPU-side mirror of a [`PageTableLevels`] grid: a single `L`-mip
/// `R32Uint` texture, synced from the CPU grid on demand.
///
/// Deliberately holds no [`PageTableLevels`] of its own — it borrows one
/// at construction and at every [`Self::sync`] call — so the owner of
/// the CPU grid (`crate::manager::ManagerCore`) stays entirely
/// device-free and unit-testable, while only this thin wrapper needs a
/// real `wgpu::Device`/`Queue`.
pub struct PageTableTexture {
    texture: Arc<wgpu::Texture>,
}

impl PageTableTexture {
    /// Allocate the mirrored GPU texture sized to match `levels`.
    #[must_use]
    pub fn new(device: &wgpu::Device, levels: &PageTableLevels) -> Self {
        let (pages_x, pages_y) = levels.dims(0).expect("at least one mip level");
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vt-page-tables"),
            size: wgpu::Extent3d {
                width: pages_x,
                height: pages_y,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.lods(),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        Self {
            texture: Arc::new(texture),
        }
    }

    /// The mirrored GPU texture.
    #[must_use]
    pub fn texture(&self) -> &Arc<wgpu::Texture> {
        &self.texture
    }

    /// Upload every level of `levels` to its matching GPU mip.
    ///
    /// This is the only synchronization point for the GPU view and must
    /// run once per frame, after every [`PageTableLevels::write`] for
    /// that frame.
    pub fn sync(&self, queue: &wgpu::Queue, levels: &PageTableLevels) {
        for mip in 0..levels.lods() {
            let (pages_x, pages_y) = levels.dims(mip).expect("mip in range");
            let bytes_per_row = pages_x * 4;
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &self.texture,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(levels.entries(mip as usize)),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(pages_y),
                },
                wgpu::Extent3d {
                    width: pages_x,
                    height: pages_y,
                    depth_or_array_layers: 1,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let slot = PageSlot::new(3, 200);
        let entry = encode_entry(slot);
        assert!(entry_is_valid(entry));
        assert_eq!(decode_entry(entry), Some(slot));
    }

    #[test]
    fn s1_entry_value() {
        let entry = encode_entry(PageSlot::new(0, 0));
        assert_eq!(entry, 1);
    }

    #[test]
    fn zero_entry_is_not_resident() {
        assert!(!entry_is_valid(0));
        assert_eq!(decode_entry(0), None);
    }

    #[test]
    fn level_chain_reaches_one_by_one() {
        let levels = PageTableLevels::new(16, 16);
        assert_eq!(levels.lods(), 5);
        assert_eq!(levels.dims(0), Some((16, 16)));
        assert_eq!(levels.dims(4), Some((1, 1)));
        assert_eq!(levels.dims(5), None);
    }

    #[test]
    fn s6_end_to_end_pinned_tile_residency() {
        // min_pinned_lod = L - 1, i.e. the coarsest 1x1 tile.
        let mut levels = PageTableLevels::new(16, 16);
        let coarsest = levels.lods() - 1;
        let request = PageRequest::new(coarsest, 0, 0);

        assert!(!levels.is_resident(request));

        let entry = encode_entry(PageSlot::new(0, 0));
        levels.write(request, entry);

        assert!(levels.is_resident(request));
        assert_eq!(entry & 1, 1);
    }

    #[test]
    fn write_with_out_of_range_lod_is_noop() {
        let mut levels = PageTableLevels::new(16, 16);
        levels.write(PageRequest::new(99, 0, 0), 1);
        assert!(!levels.is_resident(PageRequest::new(99, 0, 0)));
    }

    #[test]
    fn clearing_an_evicted_entry_unsets_residency() {
        let mut levels = PageTableLevels::new(16, 16);
        let request = PageRequest::new(0, 1, 1);
        levels.write(request, encode_entry(PageSlot::new(2, 2)));
        assert!(levels.is_resident(request));

        levels.write(request, 0);
        assert!(!levels.is_resident(request));
    }
}
