use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

/// Owned pixel buffer for one captured or loaded image.
///
/// Frames handed to the pipeline are always decoded (`Rgb24`, `Bgr24` or
/// `Gray8`); `Yuyv4` and `Mjpeg` only describe raw device payloads.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Per-source sequence number, starting at 1
    pub sequence: u64,

    /// Monotonic capture time for latency tracking
    pub timestamp: Instant,

    /// Wall-clock capture time carried into detections
    pub captured_at: SystemTime,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Gray8,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed payloads.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            format: PixelFormat::Rgb24,
            sequence: 0,
            timestamp: Instant::now(),
            captured_at: SystemTime::now(),
        }
    }
}

impl Frame {
    /// Wrap an already decoded RGB24 buffer.
    pub fn rgb24(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::with_format(width, height, PixelFormat::Rgb24, data)
    }

    pub fn with_format(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
            format,
            ..Self::default()
        }
    }

    /// Byte length a buffer of this geometry and format must have.
    pub fn expected_len(&self) -> Option<usize> {
        self.format
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * self.height as usize * bpp)
    }

    /// True when the buffer length agrees with width, height and format.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.expected_len() == Some(self.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write one row of luminance values into `out`.
    ///
    /// Returns `false` for compressed formats or an out-of-range row.
    pub fn luma_row(&self, y: u32, out: &mut Vec<u8>) -> bool {
        if y >= self.height {
            return false;
        }
        let width = self.width as usize;
        out.clear();
        match self.format {
            PixelFormat::Gray8 => {
                let start = y as usize * width;
                out.extend_from_slice(&self.data[start..start + width]);
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let start = y as usize * width * 3;
                let row = &self.data[start..start + width * 3];
                out.extend(row.chunks_exact(3).map(luma_of));
            }
            _ => return false,
        }
        true
    }

    /// Write one column of luminance values into `out`.
    pub fn luma_column(&self, x: u32, out: &mut Vec<u8>) -> bool {
        if x >= self.width {
            return false;
        }
        let width = self.width as usize;
        let x = x as usize;
        out.clear();
        match self.format {
            PixelFormat::Gray8 => {
                out.extend((0..self.height as usize).map(|y| self.data[y * width + x]));
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                out.extend((0..self.height as usize).map(|y| {
                    let i = (y * width + x) * 3;
                    luma_of(&self.data[i..i + 3])
                }));
            }
            _ => return false,
        }
        true
    }
}

// Channel order does not matter for an unweighted average.
fn luma_of(px: &[u8]) -> u8 {
    ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8
}
