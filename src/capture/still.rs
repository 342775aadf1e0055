//! Still images for File mode.

use std::path::Path;

use super::frame::Frame;
use crate::error::ScanError;

/// Extensions accepted for dropped files, matching what `image` is built with.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Decode an image file into an RGB24 frame.
pub fn load_image_file(path: &Path) -> Result<Frame, ScanError> {
    let image = image::open(path).map_err(|e| ScanError::ImageLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(ScanError::ImageLoad {
            path: path.to_path_buf(),
            reason: "image has no pixels".into(),
        });
    }

    Ok(Frame::rgb24(width, height, rgb.into_raw()))
}
