//! The physical atlas texture: a grid of padded slots uploaded to from
//! decoded page images.

use std::sync::Arc;

use crate::config::VtConfig;
use crate::request::PageSlot;

/// The physical, mutable RGBA8 atlas texture.
///
/// Organized as a grid of `slot_size x slot_size` slots (page pixels
/// plus padding gutter on every side), so hardware bilinear filtering
/// never samples across a page boundary.
pub struct Atlas {
    texture: Arc<wgpu::Texture>,
    slot_size: u32,
}

impl Atlas {
    /// Allocate the atlas texture for `config`.
    #[must_use]
    pub fn new(device: &wgpu::Device, config: &VtConfig) -> Self {
        let size = config.atlas_size();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vt-atlas"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        Self {
            texture: Arc::new(texture),
            slot_size: config.slot_size(),
        }
    }

    /// The underlying atlas GPU texture.
    #[must_use]
    pub fn texture(&self) -> &Arc<wgpu::Texture> {
        &self.texture
    }

    /// Upload a decoded page's RGBA8 pixels (already sized
    /// `slot_size x slot_size`, including padding) into `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `pixels` does not hold exactly `slot_size * slot_size`
    /// RGBA8 texels; the loader is responsible for producing
    /// padded-and-sized page images before they reach the atlas.
    pub fn upload_slot(&self, queue: &wgpu::Queue, slot: PageSlot, pixels: &[u8]) {
        let expected = (self.slot_size * self.slot_size * 4) as usize;
        assert_eq!(
            pixels.len(),
            expected,
            "page image must be exactly slot_size x slot_size RGBA8"
        );

        let (origin_x, origin_y) = slot.pixel_origin(self.slot_size);
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin_x,
                    y: origin_y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.slot_size * 4),
                rows_per_image: Some(self.slot_size),
            },
            wgpu::Extent3d {
                width: self.slot_size,
                height: self.slot_size,
                depth_or_array_layers: 1,
            },
        );
    }
}
