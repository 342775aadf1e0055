pub mod capture;
pub mod detect;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, PixelFormat};
pub use detect::{BarcodeFormat, Decoder, DecoderKind, Detection, Point};
pub use error::{DecodeError, Result, ScanError};
pub use pipeline::{Mode, ModeController, ResultLog, ResultSnapshot, ResultStore};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "barscope.toml";
/// Prefix of environment overrides, e.g. `BARSCOPE__CAPTURE__WIDTH=1280`
pub const ENV_PREFIX: &str = "BARSCOPE";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detect: DetectConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    pub decoder: DecoderKind,
    /// Scan every n-th row (and column, for the omni decoder)
    pub row_step: u32,
    /// Minimum max-min luminance spread for a scanline to be considered
    pub min_contrast: u8,
    /// Scanlines that must agree before a symbol is reported
    pub min_row_hits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub show_overlay: bool,
    pub overlay_color: [u8; 3],
    pub overlay_thickness: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
            buffer_count: 4,
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderKind::Scanline,
            row_step: 4,
            min_contrast: 40,
            min_row_hits: 2,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "Barscope".into(),
            width: 1280,
            height: 720,
            fps: 30,
            show_overlay: true,
            overlay_color: [0, 255, 0],
            overlay_thickness: 2.0,
        }
    }
}

impl Config {
    /// Defaults, then `path` (or [`DEFAULT_CONFIG_FILE`] if present), then
    /// `BARSCOPE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.capture.device_index, 0);
        assert_eq!((config.capture.width, config.capture.height, config.capture.fps), (640, 480, 30));
        assert_eq!(config.detect.decoder, DecoderKind::Scanline);
        assert_eq!((config.display.width, config.display.height), (1280, 720));
        assert!(config.display.show_overlay);
    }

    #[test]
    fn file_overrides_defaults_per_key() {
        let path = std::env::temp_dir().join(format!("barscope-config-{}.toml", std::process::id()));
        fs::write(
            &path,
            "[capture]\nwidth = 1920\nheight = 1080\n\n[detect]\ndecoder = \"omni\"\n",
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.capture.width, 1920);
        assert_eq!(config.capture.height, 1080);
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.detect.decoder, DecoderKind::Omni);
        assert_eq!(config.display, DisplayConfig::default());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/barscope.toml"))).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
