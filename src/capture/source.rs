//! Device lifecycle and the current-frame buffer.

use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use super::convert;
use super::device::{CaptureBackend, CaptureHandle};
use super::frame::{Frame, PixelFormat};
use super::still;
use crate::error::ScanError;

/// Read side of a [`CaptureSource`]'s current frame.
///
/// Frames are published whole behind an `Arc`, so a reader holds either the
/// previous or the new frame and never a buffer that is being written.
#[derive(Clone, Default)]
pub struct FrameFeed {
    slot: Arc<ArcSwapOption<Frame>>,
}

impl FrameFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.load_full()
    }

    fn publish(&self, frame: Arc<Frame>) -> Option<Arc<Frame>> {
        self.slot.swap(Some(frame))
    }

    fn clear(&self) -> Option<Arc<Frame>> {
        self.slot.swap(None)
    }
}

/// Per-source counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub skipped: u64,
    /// Ticks where the spare buffer was still held by a reader
    pub reallocated: u64,
}

/// Owns the device handle and the frame buffers.
///
/// Two buffers rotate: the published one and a spare. A tick writes into the
/// spare only when no reader still holds it, otherwise it allocates.
pub struct CaptureSource {
    backend: Arc<dyn CaptureBackend>,
    handle: Option<Box<dyn CaptureHandle>>,
    device_index: Option<usize>,
    feed: FrameFeed,
    spare: Option<Arc<Frame>>,
    sequence: u64,
    stats: CaptureStats,
}

impl CaptureSource {
    pub fn new(backend: Arc<dyn CaptureBackend>, feed: FrameFeed) -> Self {
        Self {
            backend,
            handle: None,
            device_index: None,
            feed,
            spare: None,
            sequence: 0,
            stats: CaptureStats::default(),
        }
    }

    /// Acquire device `index`, replacing whatever frame was current.
    ///
    /// On failure the previous device and frame are left untouched.
    pub fn open(&mut self, index: usize) -> Result<(u32, u32), ScanError> {
        let handle = self.backend.open(index)?;
        self.close();

        let resolution = handle.resolution();
        info!(
            "Capture device {} open at {}x{}",
            index, resolution.0, resolution.1
        );

        self.handle = Some(handle);
        self.device_index = Some(index);
        Ok(resolution)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Best-effort resize of the open device.
    pub fn reconfigure(&mut self, width: u32, height: u32) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        let accepted = handle.negotiate_resolution(width, height);
        if !accepted {
            let (w, h) = handle.resolution();
            warn!("Device kept {}x{} (requested {}x{})", w, h, width, height);
        }
        accepted
    }

    /// Release the device and frame buffers. Returns whether a device was open.
    pub fn close(&mut self) -> bool {
        let was_open = self.handle.take().is_some();
        if let Some(index) = self.device_index.take() {
            info!("Capture device {} closed", index);
        }
        self.spare = None;
        self.feed.clear();
        was_open
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.feed.latest()
    }

    pub fn frame_feed(&self) -> FrameFeed {
        self.feed.clone()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Grab one frame from the open device and make it current.
    ///
    /// Returns `None` when no device is open or the grab failed; a failed
    /// grab leaves the previous frame current.
    pub fn capture_tick(&mut self) -> Option<Arc<Frame>> {
        let handle = self.handle.as_mut()?;

        let mut slot = match self.spare.take() {
            Some(frame) if Arc::strong_count(&frame) == 1 => frame,
            Some(_) => {
                self.stats.reallocated += 1;
                Arc::new(Frame::default())
            }
            None => Arc::new(Frame::default()),
        };
        // Unique at this point, so this never clones
        let frame = Arc::make_mut(&mut slot);

        let raw = match handle.grab() {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Skipping capture tick: {}", e);
                self.stats.skipped += 1;
                self.spare = Some(slot);
                return None;
            }
        };
        let (width, height) = match convert::to_rgb24(raw, &mut frame.data) {
            Ok(dims) => dims,
            Err(e) => {
                debug!("Skipping capture tick: {}", e);
                self.stats.skipped += 1;
                self.spare = Some(slot);
                return None;
            }
        };

        self.sequence += 1;
        frame.width = width;
        frame.height = height;
        frame.format = PixelFormat::Rgb24;
        frame.sequence = self.sequence;
        frame.timestamp = Instant::now();
        frame.captured_at = SystemTime::now();
        self.stats.captured += 1;

        let current = Arc::clone(&slot);
        self.spare = self.feed.publish(slot);
        Some(current)
    }

    /// Static pseudo-device: make one decoded file the current frame.
    ///
    /// On failure the previous frame stays current.
    pub fn load_image(&mut self, path: &Path) -> Result<Arc<Frame>, ScanError> {
        let mut frame = still::load_image_file(path)?;
        self.sequence += 1;
        frame.sequence = self.sequence;
        info!("Loaded image: {}x{}", frame.width, frame.height);

        let frame = Arc::new(frame);
        self.spare = None;
        self.feed.publish(Arc::clone(&frame));
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::convert::RawFrame;
    use crate::capture::device::DeviceDescriptor;
    use crate::error::GrabError;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    /// Serves solid gray RGB frames whose value increments per grab; every
    /// third grab fails when `flaky` is set.
    struct TestBackend {
        devices: usize,
        flaky: bool,
        closed: Arc<AtomicUsize>,
    }

    struct TestHandle {
        buf: Vec<u8>,
        value: Arc<AtomicU8>,
        grabs: usize,
        flaky: bool,
        size: (u32, u32),
        closed: Arc<AtomicUsize>,
    }

    impl CaptureBackend for TestBackend {
        fn list_devices(&self) -> Vec<DeviceDescriptor> {
            (0..self.devices)
                .map(|index| DeviceDescriptor {
                    index,
                    name: format!("test{index}"),
                    path: String::new(),
                })
                .collect()
        }

        fn open(&self, index: usize) -> Result<Box<dyn CaptureHandle>, ScanError> {
            if index >= self.devices {
                return Err(ScanError::DeviceUnavailable {
                    index,
                    reason: "out of range".into(),
                });
            }
            Ok(Box::new(TestHandle {
                buf: Vec::new(),
                value: Arc::new(AtomicU8::new(0)),
                grabs: 0,
                flaky: self.flaky,
                size: (4, 2),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    impl CaptureHandle for TestHandle {
        fn resolution(&self) -> (u32, u32) {
            self.size
        }

        fn negotiate_resolution(&mut self, width: u32, height: u32) -> bool {
            if width <= 8 && height <= 8 {
                self.size = (width, height);
                true
            } else {
                false
            }
        }

        fn grab(&mut self) -> Result<RawFrame<'_>, GrabError> {
            self.grabs += 1;
            if self.flaky && self.grabs % 3 == 0 {
                return Err(GrabError::Transient("test".into()));
            }
            let v = self.value.fetch_add(1, Ordering::SeqCst) + 1;
            let (w, h) = self.size;
            self.buf.clear();
            self.buf.resize((w * h * 3) as usize, v);
            Ok(RawFrame {
                data: &self.buf,
                width: w,
                height: h,
                format: PixelFormat::Rgb24,
            })
        }
    }

    impl Drop for TestHandle {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn source(devices: usize, flaky: bool) -> (CaptureSource, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(TestBackend {
            devices,
            flaky,
            closed: Arc::clone(&closed),
        });
        (CaptureSource::new(backend, FrameFeed::new()), closed)
    }

    #[test]
    fn open_out_of_range_is_device_unavailable() {
        let (mut src, _) = source(1, false);
        assert!(matches!(
            src.open(3),
            Err(ScanError::DeviceUnavailable { index: 3, .. })
        ));
        assert!(!src.is_open());
        assert!(src.capture_tick().is_none());
    }

    #[test]
    fn failed_open_keeps_loaded_image() {
        let (mut src, _) = source(1, false);
        let path = std::env::temp_dir().join(format!("barscope-src-{}.png", std::process::id()));
        image::RgbImage::from_pixel(16, 16, image::Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();
        let loaded = src.load_image(&path);
        let _ = std::fs::remove_file(&path);
        let loaded = loaded.unwrap();

        assert!(src.open(5).is_err());
        assert!(Arc::ptr_eq(&loaded, &src.current_frame().unwrap()));
    }

    #[test]
    fn tick_publishes_converted_frame() {
        let (mut src, _) = source(1, false);
        src.open(0).unwrap();

        let frame = src.capture_tick().unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.sequence, 1);
        assert!(frame.is_well_formed());
        assert!(Arc::ptr_eq(&frame, &src.current_frame().unwrap()));
    }

    #[test]
    fn spare_buffer_is_recycled_when_unreferenced() {
        let (mut src, _) = source(1, false);
        src.open(0).unwrap();

        let first = src.capture_tick().unwrap();
        let first_ptr = first.data.as_ptr();
        drop(first);
        drop(src.capture_tick());
        // The first buffer is the spare now and nobody holds it
        let third = src.capture_tick().unwrap();

        assert_eq!(third.data.as_ptr(), first_ptr);
        assert_eq!(src.stats().reallocated, 0);
    }

    #[test]
    fn held_frame_is_never_overwritten() {
        let (mut src, _) = source(1, false);
        src.open(0).unwrap();

        let held = src.capture_tick().unwrap();
        let snapshot = held.data.clone();
        for _ in 0..5 {
            src.capture_tick();
        }

        assert_eq!(held.data, snapshot);
        assert!(src.stats().reallocated >= 1);
        assert_eq!(src.current_frame().unwrap().sequence, 6);
    }

    #[test]
    fn transient_failure_skips_tick_and_keeps_frame() {
        let (mut src, _) = source(1, true);
        src.open(0).unwrap();

        let a = src.capture_tick().unwrap();
        src.capture_tick().unwrap();
        assert!(src.capture_tick().is_none());

        assert_eq!(src.stats().skipped, 1);
        assert_eq!(src.current_frame().unwrap().sequence, 2);
        drop(a);
        assert_eq!(src.capture_tick().unwrap().sequence, 3);
    }

    #[test]
    fn reconfigure_is_best_effort() {
        let (mut src, _) = source(1, false);
        assert!(!src.reconfigure(2, 2));

        src.open(0).unwrap();
        assert!(src.reconfigure(2, 2));
        assert!(!src.reconfigure(640, 480));
        assert_eq!(src.capture_tick().unwrap().width, 2);
    }

    #[test]
    fn close_is_idempotent_and_releases_once() {
        let (mut src, closed) = source(1, false);
        src.open(0).unwrap();
        src.capture_tick();

        assert!(src.close());
        assert!(!src.close());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(src.current_frame().is_none());
    }
}
