//! V4L2 capture backend with memory-mapped buffers

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::Device;

use super::convert::RawFrame;
use super::device::{CaptureBackend, CaptureHandle, DeviceDescriptor};
use super::frame::PixelFormat;
use crate::error::{GrabError, ScanError};
use crate::utils::{self, fourcc_of};
use crate::CaptureConfig;

/// Opens `/dev/videoN` nodes found by [`utils::enumerate_devices`].
pub struct V4l2Backend {
    width: u32,
    height: u32,
    buffer_count: u32,
}

impl V4l2Backend {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            buffer_count: config.buffer_count.max(1),
        }
    }
}

impl CaptureBackend for V4l2Backend {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        utils::enumerate_devices()
            .into_iter()
            .enumerate()
            .map(|(index, dev)| DeviceDescriptor {
                index,
                name: dev.card,
                path: dev.path,
            })
            .collect()
    }

    #[instrument(skip(self))]
    fn open(&self, index: usize) -> Result<Box<dyn CaptureHandle>, ScanError> {
        let devices = utils::enumerate_devices();
        let found = devices.get(index).ok_or_else(|| ScanError::DeviceUnavailable {
            index,
            reason: format!("{} capture device(s) present", devices.len()),
        })?;
        let unavailable = |reason: String| ScanError::DeviceUnavailable { index, reason };

        let device = Device::with_path(&found.path).map_err(|e| unavailable(e.to_string()))?;

        // Query capabilities
        let caps = device.query_caps().map_err(|e| unavailable(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(unavailable("device doesn't support video capture".into()));
        }

        let mut handle = V4l2Handle {
            stream: None,
            device,
            width: self.width,
            height: self.height,
            format: found.format,
            buffer_count: self.buffer_count,
        };
        handle
            .apply_format(self.width, self.height)
            .map_err(|e| unavailable(e.to_string()))?;
        handle
            .start_stream()
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Box::new(handle))
    }
}

/// High-performance V4L2 capture
pub struct V4l2Handle {
    // Declared first so the stream is torn down before the device
    stream: Option<MmapStream<'static>>,
    device: Device,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer_count: u32,
}

impl V4l2Handle {
    fn apply_format(&mut self, width: u32, height: u32) -> std::io::Result<()> {
        let mut fmt = self.device.format()?;
        fmt.width = width;
        fmt.height = height;
        if let Some(fourcc) = fourcc_of(self.format) {
            fmt.fourcc = fourcc;
        }

        // Driver picks the closest supported mode and reports it back
        let applied = self.device.set_format(&fmt)?;
        self.width = applied.width;
        self.height = applied.height;
        info!(
            "Capture format: {}x{} {}",
            applied.width, applied.height, applied.fourcc
        );
        Ok(())
    }

    /// Start streaming with memory-mapped buffers
    fn start_stream(&mut self) -> std::io::Result<()> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }
}

impl CaptureHandle for V4l2Handle {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn negotiate_resolution(&mut self, width: u32, height: u32) -> bool {
        // Buffers must be released before the format can change
        self.stream = None;

        if let Err(e) = self.apply_format(width, height) {
            warn!("Failed to set {}x{}: {}", width, height, e);
        }
        if let Err(e) = self.start_stream() {
            warn!("Failed to restart capture stream: {}", e);
        }

        self.width == width && self.height == height
    }

    fn grab(&mut self) -> Result<RawFrame<'_>, GrabError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GrabError::Transient("stream not started".into()))?;

        let (buf, meta) = stream.next()?;
        let used = meta.bytesused as usize;
        let data = if used > 0 && used <= buf.len() {
            &buf[..used]
        } else {
            buf
        };

        Ok(RawFrame {
            data,
            width: self.width,
            height: self.height,
            format: self.format,
        })
    }
}
