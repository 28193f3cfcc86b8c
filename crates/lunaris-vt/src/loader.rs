//! Thread-pool-backed page image loader.
//!
//! Workers run on a small pool of OS threads, blocking on image decode.
//! Results are handed to the render thread through a single
//! mutex-protected [`LoadOutbox`] — the only structure shared between
//! workers and the render thread (`spec.md` §5). Workers hold the mutex
//! only long enough to push one element; the render thread holds it
//! only long enough to swap both vectors out into local storage.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::request::PageSlot;

/// A decoded page image: owned, contiguous RGBA8 bytes plus dimensions.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// RGBA8 pixels, row-major, already flipped vertically per the
    /// project's load convention (`spec.md` §6/§9).
    pub pixels: Vec<u8>,
}

/// A successfully completed load, still carrying the slot it was
/// dispatched for so the manager can upload and commit it.
#[derive(Debug)]
pub struct LoadSuccess {
    /// The page requested.
    pub request: crate::request::PageRequest,
    /// The slot reserved for this request at dispatch time.
    pub slot: PageSlot,
    /// The decoded image.
    pub image: LoadedImage,
}

/// A failed load: missing file, corrupt image, or any other decode
/// error. The loader does not retry.
#[derive(Debug)]
pub struct LoadFailure {
    /// The page requested.
    pub request: crate::request::PageRequest,
    /// The slot reserved for this request at dispatch time; the
    /// manager must [`crate::cache::PageCache::cancel`] it.
    pub slot: PageSlot,
    /// A human-readable description of the failure.
    pub message: String,
}

/// The mutex-protected outbox workers push completions into and the
/// render thread drains once per frame.
#[derive(Default)]
struct LoadOutbox {
    uploads: Vec<LoadSuccess>,
    failures: Vec<LoadFailure>,
}

/// Page sizing shared by every worker, fixed for the manager's lifetime.
#[derive(Clone, Copy)]
struct PagePadding {
    page_size: u32,
    padding: u32,
}

enum Task {
    Load {
        request: crate::request::PageRequest,
        slot: PageSlot,
        path: PathBuf,
    },
    Shutdown,
}

/// A small thread-pool-backed image decoder.
///
/// One worker is sufficient for correctness (`spec.md` §4.4); the pool
/// size is otherwise unspecified and chosen here to overlap a handful
/// of page decodes without oversubscribing a render-adjacent machine.
pub struct AsyncLoader {
    task_tx: mpsc::Sender<Task>,
    outbox: Arc<Mutex<LoadOutbox>>,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncLoader {
    /// Spawn a pool of `worker_count` threads (minimum 1).
    ///
    /// `page_size` and `padding` describe the virtual texture's own page
    /// and gutter dimensions (`spec.md` §6); every decoded page is
    /// border-padded to `page_size + 2 * padding` before it reaches the
    /// outbox, so the atlas always receives a slot-sized upload.
    #[must_use]
    pub fn new(worker_count: usize, page_size: u32, padding: u32) -> Self {
        let worker_count = worker_count.max(1);
        let sizing = PagePadding { page_size, padding };
        let (task_tx, task_rx) = mpsc::channel::<Task>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let outbox = Arc::new(Mutex::new(LoadOutbox::default()));

        let workers = (0..worker_count)
            .map(|id| {
                let task_rx = Arc::clone(&task_rx);
                let outbox = Arc::clone(&outbox);
                std::thread::Builder::new()
                    .name(format!("vt-loader-{id}"))
                    .spawn(move || worker_loop(&task_rx, &outbox, sizing))
                    .expect("failed to spawn virtual texture loader thread")
            })
            .collect();

        Self {
            task_tx,
            outbox,
            workers,
        }
    }

    /// Dispatch a page load for `request`, reserved in `slot`.
    ///
    /// The completion lands in the outbox asynchronously; call
    /// [`Self::drain`] once per frame on the render thread to retrieve
    /// it. Cancellation is not supported: a load whose request is
    /// evicted while in flight still completes and must be handled by
    /// the caller as a failed load (`spec.md` §4.4).
    pub fn load_async(&self, request: crate::request::PageRequest, slot: PageSlot, path: impl AsRef<Path>) {
        let task = Task::Load {
            request,
            slot,
            path: path.as_ref().to_path_buf(),
        };
        // A send error means every worker thread has exited, which only
        // happens after `shutdown`; dispatching after shutdown is a
        // caller bug we simply drop rather than panic on.
        let _ = self.task_tx.send(task);
    }

    /// Swap out and return everything completed since the last drain.
    ///
    /// Holds the outbox mutex only long enough to move both vectors out;
    /// all further processing runs on the caller's local copies.
    pub fn drain(&self) -> (Vec<LoadSuccess>, Vec<LoadFailure>) {
        let mut outbox = self.outbox.lock().expect("loader outbox mutex poisoned");
        (
            std::mem::take(&mut outbox.uploads),
            std::mem::take(&mut outbox.failures),
        )
    }
}

impl Drop for AsyncLoader {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.task_tx.send(Task::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    task_rx: &Arc<Mutex<mpsc::Receiver<Task>>>,
    outbox: &Arc<Mutex<LoadOutbox>>,
    sizing: PagePadding,
) {
    loop {
        let task = {
            let rx = task_rx.lock().expect("loader task queue mutex poisoned");
            rx.recv()
        };
        let Ok(task) = task else {
            // Sender dropped; nothing left to do.
            return;
        };
        match task {
            Task::Shutdown => return,
            Task::Load {
                request,
                slot,
                path,
            } => {
                let result = decode_page(&path, sizing.page_size, sizing.padding);
                let mut outbox = outbox.lock().expect("loader outbox mutex poisoned");
                match result {
                    Ok(image) => outbox.uploads.push(LoadSuccess {
                        request,
                        slot,
                        image,
                    }),
                    Err(message) => {
                        tracing::warn!("failed to load page {request} from {path:?}: {message}");
                        outbox.failures.push(LoadFailure {
                            request,
                            slot,
                            message,
                        });
                    }
                }
            }
        }
    }
}

/// Decode a page image, flip it vertically per the project convention
/// (`spec.md` §9: loader flips, nothing downstream compensates), and pad
/// it to `page_size + 2 * padding` on every side so the result is ready
/// for a direct, full-slot upload into the atlas (`spec.md` §3: "Padding
/// bytes are included in every upload").
///
/// A page asset whose pixel dimensions don't match `page_size` is a
/// malformed-asset condition, reported as a load failure rather than a
/// panic, consistent with every other per-page error in this module.
fn decode_page(path: &Path, page_size: u32, padding: u32) -> Result<LoadedImage, String> {
    let img = image::open(path).map_err(|e| e.to_string())?;
    let img = img.flipv().to_rgba8();
    let (width, height) = img.dimensions();
    if width != page_size || height != page_size {
        return Err(format!(
            "page image {path:?} is {width}x{height}, expected {page_size}x{page_size}"
        ));
    }
    Ok(pad_with_border_replication(&img, padding))
}

/// Grow `image` by `padding` pixels on every side, replicating the
/// nearest edge pixel into the new gutter (border-clamp padding). This
/// is what makes hardware bilinear filtering safe at page boundaries
/// once the result is uploaded into the atlas.
fn pad_with_border_replication(image: &image::RgbaImage, padding: u32) -> LoadedImage {
    let (src_w, src_h) = image.dimensions();
    if padding == 0 {
        return LoadedImage {
            width: src_w,
            height: src_h,
            pixels: image.clone().into_raw(),
        };
    }

    let dst_w = src_w + 2 * padding;
    let dst_h = src_h + 2 * padding;
    let mut pixels = vec![0u8; (dst_w * dst_h * 4) as usize];

    for dst_y in 0..dst_h {
        let src_y = (dst_y as i64 - padding as i64).clamp(0, src_h as i64 - 1) as u32;
        for dst_x in 0..dst_w {
            let src_x = (dst_x as i64 - padding as i64).clamp(0, src_w as i64 - 1) as u32;
            let pixel = image.get_pixel(src_x, src_y);
            let dst_idx = ((dst_y * dst_w + dst_x) * 4) as usize;
            pixels[dst_idx..dst_idx + 4].copy_from_slice(&pixel.0);
        }
    }

    LoadedImage {
        width: dst_w,
        height: dst_h,
        pixels,
    }
}
