use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;

/// Highest `/dev/videoN` probed during enumeration
const MAX_VIDEO_NODES: usize = 16;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
    pub format: PixelFormat,
}

/// Enumerate V4L2 capture nodes that can deliver MJPEG or YUYV.
///
/// Metadata-only nodes (which most UVC cameras expose next to the real one)
/// are skipped, so indices match what a user thinks of as "camera N".
pub fn enumerate_devices() -> Vec<FoundDevice> {
    let mut found = Vec::new();

    for i in 0..MAX_VIDEO_NODES {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Cannot open {}", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Check for capture capability
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Some(format) = preferred_format(&dev) {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            found.push(FoundDevice {
                path,
                card: caps.card,
                format,
            });
        }
    }

    found
}

/// Prefer MJPEG (cheap to transfer at high resolutions), fall back to YUYV.
pub(crate) fn preferred_format(dev: &Device) -> Option<PixelFormat> {
    let formats = dev.enum_formats().ok()?;
    let mut best = None;
    for fmt in formats {
        if fmt.fourcc == FourCC::new(b"MJPG") {
            return Some(PixelFormat::Mjpeg);
        } else if fmt.fourcc == FourCC::new(b"YUYV") {
            best = Some(PixelFormat::Yuyv4);
        }
    }
    best
}

pub(crate) fn fourcc_of(format: PixelFormat) -> Option<FourCC> {
    match format {
        PixelFormat::Mjpeg => Some(FourCC::new(b"MJPG")),
        PixelFormat::Yuyv4 => Some(FourCC::new(b"YUYV")),
        PixelFormat::Rgb24 => Some(FourCC::new(b"RGB3")),
        PixelFormat::Bgr24 => Some(FourCC::new(b"BGR3")),
        PixelFormat::Gray8 => Some(FourCC::new(b"GREY")),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// with the `profiling` feature spans also go to Tracy.
pub fn init_tracing() {
    use tracing_subscriber::fmt::time::uptime;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("barscope=info,barscope_scan=info"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::Layer;
        tracing_subscriber::registry()
            .with(tracing_tracy::TracyLayer::default())
            .with(tracing_subscriber::fmt::layer().with_timer(uptime()).with_filter(filter))
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(uptime())
            .init();
    }
}

/// Format a wall-clock time as `HH:MM:SS` (UTC).
pub fn clock_time(at: std::time::SystemTime) -> String {
    let secs = at
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let day = secs % 86_400;
    format!("{:02}:{:02}:{:02}", day / 3600, (day / 60) % 60, day % 60)
}
