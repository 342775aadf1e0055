//! Raw device payload to RGB24 conversion.

use zune_jpeg::JpegDecoder;

use super::frame::PixelFormat;
use crate::error::ConvertError;

/// One payload as delivered by a capture handle, borrowed from the driver.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Decode `raw` into `dst` as interleaved RGB24, reusing its allocation.
///
/// Returns the decoded dimensions, which for MJPEG come from the stream
/// header rather than the negotiated format.
pub fn to_rgb24(raw: RawFrame<'_>, dst: &mut Vec<u8>) -> Result<(u32, u32), ConvertError> {
    match raw.format {
        PixelFormat::Mjpeg => decode_mjpeg(raw.data, dst),
        PixelFormat::Rgb24 => {
            let data = check_len(&raw, 3)?;
            dst.clear();
            dst.extend_from_slice(data);
            Ok((raw.width, raw.height))
        }
        PixelFormat::Bgr24 => {
            let data = check_len(&raw, 3)?;
            dst.clear();
            for px in data.chunks_exact(3) {
                dst.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Ok((raw.width, raw.height))
        }
        PixelFormat::Gray8 => {
            let data = check_len(&raw, 1)?;
            dst.clear();
            for &v in data {
                dst.extend_from_slice(&[v, v, v]);
            }
            Ok((raw.width, raw.height))
        }
        PixelFormat::Yuyv4 => {
            let data = check_len(&raw, 2)?;
            yuyv_to_rgb24(data, dst);
            Ok((raw.width, raw.height))
        }
    }
}

/// The first `width * height * bpp` bytes of the payload.
fn check_len<'a>(raw: &RawFrame<'a>, bpp: usize) -> Result<&'a [u8], ConvertError> {
    let expected = raw.width as usize * raw.height as usize * bpp;
    // Drivers may pad the buffer past the image; anything shorter is torn
    if raw.data.len() < expected || expected == 0 {
        return Err(ConvertError::SizeMismatch {
            width: raw.width,
            height: raw.height,
            format: raw.format,
            actual: raw.data.len(),
        });
    }
    Ok(&raw.data[..expected])
}

fn decode_mjpeg(data: &[u8], dst: &mut Vec<u8>) -> Result<(u32, u32), ConvertError> {
    let mut decoder = JpegDecoder::new(data);
    decoder
        .decode_headers()
        .map_err(|e| ConvertError::Jpeg(e.to_string()))?;

    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| ConvertError::Jpeg("missing frame header".into()))?;
    let size = decoder
        .output_buffer_size()
        .ok_or_else(|| ConvertError::Jpeg("unknown output size".into()))?;

    dst.resize(size, 0);
    decoder
        .decode_into(dst)
        .map_err(|e| ConvertError::Jpeg(e.to_string()))?;

    Ok((width as u32, height as u32))
}

/// BT.601 limited-range YUYV (YUY2) to RGB24.
fn yuyv_to_rgb24(src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    dst.reserve(src.len() / 2 * 3);
    for chunk in src.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        dst.extend_from_slice(&yuv_to_rgb(y0, u, v));
        dst.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_black_and_white() {
        // Two pixels per macropixel: Y0 U Y1 V
        let payload = [16, 128, 235, 128];
        let raw = RawFrame {
            data: &payload,
            width: 2,
            height: 1,
            format: PixelFormat::Yuyv4,
        };
        let mut out = Vec::new();
        let dims = to_rgb24(raw, &mut out).unwrap();

        assert_eq!(dims, (2, 1));
        assert_eq!(&out[..3], &[0, 0, 0]);
        assert_eq!(&out[3..], &[255, 255, 255]);
    }

    #[test]
    fn bgr_is_swizzled() {
        let payload = [1, 2, 3];
        let raw = RawFrame {
            data: &payload,
            width: 1,
            height: 1,
            format: PixelFormat::Bgr24,
        };
        let mut out = vec![9; 64];
        to_rgb24(raw, &mut out).unwrap();
        assert_eq!(out, vec![3, 2, 1]);
    }

    #[test]
    fn short_payload_is_rejected() {
        let payload = [0u8; 10];
        let raw = RawFrame {
            data: &payload,
            width: 4,
            height: 4,
            format: PixelFormat::Rgb24,
        };
        let mut out = Vec::new();
        assert!(matches!(
            to_rgb24(raw, &mut out),
            Err(ConvertError::SizeMismatch { actual: 10, .. })
        ));
    }

    #[test]
    fn padded_payload_is_trimmed() {
        let mut payload = vec![7u8; 24];
        payload.extend_from_slice(&[0xAA; 8]);
        let raw = RawFrame {
            data: &payload,
            width: 4,
            height: 2,
            format: PixelFormat::Rgb24,
        };
        let mut out = vec![1; 64];
        assert_eq!(to_rgb24(raw, &mut out).unwrap(), (4, 2));
        assert_eq!(out, vec![7u8; 24]);

        let yuyv = [16u8, 128, 16, 128, 0xAA, 0xAA, 0xAA, 0xAA];
        let raw = RawFrame {
            data: &yuyv,
            width: 2,
            height: 1,
            format: PixelFormat::Yuyv4,
        };
        to_rgb24(raw, &mut out).unwrap();
        assert_eq!(out, vec![0u8; 6]);
    }

    #[test]
    fn garbage_jpeg_is_an_error() {
        let payload = [0u8, 1, 2, 3, 4, 5];
        let raw = RawFrame {
            data: &payload,
            width: 2,
            height: 2,
            format: PixelFormat::Mjpeg,
        };
        let mut out = Vec::new();
        assert!(matches!(to_rgb24(raw, &mut out), Err(ConvertError::Jpeg(_))));
    }
}
