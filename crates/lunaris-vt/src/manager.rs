//! The page manager: orchestrates the cache, page tables, atlas, and
//! loader into the per-frame residency pipeline (`spec.md` §4.5).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::atlas::Atlas;
use crate::cache::PageCache;
use crate::config::VtConfig;
use crate::error::Result;
use crate::feedback::decode_feedback;
use crate::loader::{AsyncLoader, LoadFailure, LoadSuccess};
use crate::page_table::{encode_entry, PageTableLevels, PageTableTexture};
use crate::request::PageRequest;

/// The device-free half of the residency pipeline: everything `spec.md`
/// §4.5 describes except the two GPU uploads (atlas texture, page-table
/// mirror), which [`PageManager`] layers on top.
///
/// Split out so the orchestration logic — startup pinning, the
/// drain/ingest sequence, and the eviction/dispatch decisions — is
/// unit-testable without a `wgpu::Device`, the same way [`PageTableLevels`]
/// was split from its GPU mirror.
struct ManagerCore {
    config: VtConfig,
    cache: PageCache,
    page_tables: PageTableLevels,
    loader: AsyncLoader,
    /// Requests accepted by `acquire` and dispatched to the loader but
    /// not yet committed or failed. Disjoint from the cache's resident
    /// set at every frame boundary (`spec.md` §3 invariant 5).
    processing: HashSet<PageRequest>,
    page_root: PathBuf,
}

impl ManagerCore {
    fn new(config: VtConfig, page_root: PathBuf, worker_count: usize) -> Result<Self> {
        config.validate()?;

        let pages_per_edge = config.pages_per_edge();
        let lods = config.lods();
        let cache = PageCache::new(
            config.atlas_slots,
            config.atlas_slots,
            config.min_pinned_lod,
            lods,
            pages_per_edge,
            pages_per_edge,
        );
        let page_tables = PageTableLevels::new(pages_per_edge, pages_per_edge);
        let loader = AsyncLoader::new(worker_count.max(1), config.page_size, config.page_padding);

        let mut core = Self {
            config,
            cache,
            page_tables,
            loader,
            processing: HashSet::new(),
            page_root,
        };

        core.preload_pinned_tiers();
        Ok(core)
    }

    fn preload_pinned_tiers(&mut self) {
        let lods = self.page_tables.lods();
        for lod in self.config.min_pinned_lod..lods {
            let (pages_x, pages_y) = self.config.dims_at_lod(lod);
            for y in 0..pages_y {
                for x in 0..pages_x {
                    self.request_page(PageRequest::new(lod, x as i32, y as i32));
                }
            }
        }
    }

    fn processing_count(&self) -> usize {
        self.processing.len()
    }

    /// Drain the loader's outbox, applying every completion's
    /// CPU-side effects (cache/page-table bookkeeping, `processing`
    /// removal) and returning the raw successes/failures so the caller
    /// can perform the GPU-dependent half (atlas upload).
    fn drain_completions(&mut self) -> (Vec<LoadSuccess>, Vec<LoadFailure>) {
        let (uploads, failures) = self.loader.drain();

        for failure in &failures {
            tracing::warn!(
                "load failed for page {}: {}",
                failure.request,
                failure.message
            );
            self.cache.cancel(failure.slot);
            self.processing.remove(&failure.request);
        }

        for success in &uploads {
            let entry = encode_entry(success.slot);
            self.page_tables.write(success.request, entry);
            self.cache.commit(success.request, success.slot);
            self.processing.remove(&success.request);
            tracing::debug!(
                "committed page {} into slot {:?}",
                success.request,
                success.slot
            );
        }

        (uploads, failures)
    }

    fn ingest_feedback(&mut self, feedback_frame: &[u32]) {
        for request in decode_feedback(feedback_frame) {
            self.cache.touch(request);
            if !self.page_tables.is_resident(request) && !self.processing.contains(&request) {
                self.request_page(request);
            }
        }
    }

    /// Acquire a slot for `request` and dispatch its load, or drop the
    /// request for this frame if the cache has no evictable slot.
    fn request_page(&mut self, request: PageRequest) {
        let decision = self.cache.acquire(request);

        let Some(slot) = decision.slot else {
            tracing::warn!("no evictable slot for page {request}, dropping for this frame");
            self.processing.remove(&request);
            return;
        };

        if let Some(evicted) = decision.evicted {
            self.page_tables.write(evicted, 0);
        }

        self.processing.insert(request);

        let path = self
            .page_root
            .join(format!("{}_{}_{}.png", request.lod, request.x, request.y));
        self.loader.load_async(request, slot, path);
    }
}

/// Orchestrates the residency pipeline: ingest feedback, issue loads,
/// flush completed uploads into the atlas and page tables, and
/// maintain the `processing` set.
///
/// Construction preloads every page at every pinned mip level
/// (`lod >= min_pinned_lod`); these loads complete over the first few
/// frames and populate the pinned floor of the cache.
pub struct PageManager {
    core: ManagerCore,
    page_table_texture: PageTableTexture,
    atlas: Atlas,
}

impl PageManager {
    /// Construct the manager and dispatch the startup loads for every
    /// pinned mip level.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(
        device: &wgpu::Device,
        config: VtConfig,
        page_root: impl Into<PathBuf>,
        worker_count: usize,
    ) -> Result<Self> {
        let atlas = Atlas::new(device, &config);
        let core = ManagerCore::new(config, page_root.into(), worker_count)?;
        let page_table_texture = PageTableTexture::new(device, &core.page_tables);

        Ok(Self {
            core,
            page_table_texture,
            atlas,
        })
    }

    /// The atlas GPU texture.
    #[must_use]
    pub fn atlas_texture(&self) -> &Arc<wgpu::Texture> {
        self.atlas.texture()
    }

    /// The page-table GPU texture (`R32Uint`, `L` mips).
    #[must_use]
    pub fn page_table_texture(&self) -> &Arc<wgpu::Texture> {
        self.page_table_texture.texture()
    }

    /// Number of requests currently dispatched to the loader.
    #[must_use]
    pub fn processing_count(&self) -> usize {
        self.core.processing_count()
    }

    /// Run one frame's residency pipeline: drain completions, ingest
    /// this frame's feedback, and sync the page tables' GPU mirror.
    ///
    /// `feedback_frame` is the previous frame's rasterized feedback
    /// buffer (`spec.md` §6); `queue` is used both to upload completed
    /// pages into the atlas and to sync the page-table mirror.
    pub fn run_frame(&mut self, queue: &wgpu::Queue, feedback_frame: &[u32]) {
        let (uploads, _failures) = self.core.drain_completions();
        for success in &uploads {
            self.atlas
                .upload_slot(queue, success.slot, &success.image.pixels);
        }

        self.core.ingest_feedback(feedback_frame);
        self.page_table_texture.sync(queue, &self.core.page_tables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `PageManager` itself owns `wgpu` resources (the atlas and
    // page-table textures), so it isn't unit tested here the same way
    // `lunaris-renderer::gpu::GraphicsContext` isn't: both need a real
    // adapter. Its orchestration logic lives in the device-free
    // `ManagerCore`, which these tests exercise directly.

    fn core(config: VtConfig, page_root: PathBuf) -> ManagerCore {
        ManagerCore::new(config, page_root, 1).expect("valid config")
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lunaris-vt-manager-test-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).expect("create temp test dir");
        dir
    }

    /// A config with exactly one page at one mip, so a single pinned
    /// tier load exercises the whole pipeline quickly.
    fn tiny_config() -> VtConfig {
        VtConfig {
            virtual_size: 2,
            page_size: 2,
            page_padding: 0,
            atlas_slots: 1,
            min_pinned_lod: 0,
        }
    }

    #[test]
    fn request_page_dispatches_and_tracks_processing() {
        let mut core = core(
            VtConfig {
                min_pinned_lod: 99, // disable startup preloading for this test
                ..VtConfig::default()
            },
            PathBuf::from("assets/pages"),
        );
        assert_eq!(core.processing_count(), 0);

        let request = PageRequest::new(0, 3, 4);
        core.request_page(request);

        assert_eq!(core.processing_count(), 1);
        assert!(core.processing.contains(&request));
    }

    #[test]
    fn construction_preloads_every_pinned_tier_page() {
        let config = VtConfig::default();
        let core = core(config, PathBuf::from("assets/pages"));
        // min_pinned_lod=4 over a 16x16 pages-per-edge grid has exactly
        // one pinned tier, the 1x1 coarsest mip.
        assert_eq!(core.processing_count(), 1);
    }

    #[test]
    fn completed_load_commits_into_cache_and_page_table() {
        let dir = temp_dir("commit");
        let path = dir.join("0_0_0.png");
        let img = image::RgbaImage::new(2, 2);
        image::DynamicImage::ImageRgba8(img)
            .save(&path)
            .expect("write test png");

        let request = PageRequest::new(0, 0, 0);
        let mut core = core(tiny_config(), dir.clone());
        assert_eq!(core.processing_count(), 1);
        assert!(core.processing.contains(&request));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let uploads = loop {
            let (uploads, failures) = core.drain_completions();
            assert!(failures.is_empty(), "unexpected load failure: {failures:?}");
            if !uploads.is_empty() {
                break uploads;
            }
            assert!(std::time::Instant::now() < deadline, "load never completed");
            std::thread::sleep(std::time::Duration::from_millis(10));
        };

        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].request, request);
        assert!(core.page_tables.is_resident(request));
        assert_eq!(core.processing_count(), 0);
    }

    #[test]
    fn failed_load_cancels_slot_and_clears_processing() {
        // No file is ever written at this path: the load must fail,
        // not hang or panic.
        let dir = temp_dir("fail");
        let request = PageRequest::new(0, 0, 0);
        let mut core = core(tiny_config(), dir.clone());
        assert_eq!(core.processing_count(), 1);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let failures = loop {
            let (uploads, failures) = core.drain_completions();
            assert!(uploads.is_empty(), "unexpected successful load: {uploads:?}");
            if !failures.is_empty() {
                break failures;
            }
            assert!(std::time::Instant::now() < deadline, "load never completed");
            std::thread::sleep(std::time::Duration::from_millis(10));
        };

        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].request, request);
        assert!(!core.page_tables.is_resident(request));
        assert_eq!(core.processing_count(), 0);
    }

    #[test]
    fn ingest_feedback_requests_only_non_resident_pages() {
        let mut core = core(
            VtConfig {
                min_pinned_lod: 99,
                ..VtConfig::default()
            },
            PathBuf::from("assets/pages"),
        );
        assert_eq!(core.processing_count(), 0);

        // lod=1, x=0, y=0 and lod=1, x=1, y=0 (spec.md's S5 feedback example).
        core.ingest_feedback(&[crate::feedback::NO_REQUEST, 0x0000_0001, 0x0000_0021]);
        assert_eq!(core.processing_count(), 2);

        // Ingesting the same feedback again must not double-dispatch;
        // both requests are already in `processing`.
        core.ingest_feedback(&[0x0000_0001, 0x0000_0021]);
        assert_eq!(core.processing_count(), 2);
    }
}
