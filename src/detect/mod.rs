//! Decode capability: the [`Decoder`] trait, its result types, and the
//! built-in backends selected by [`DecoderKind`].

pub mod ean13;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::DecodeError;
use crate::DetectConfig;

pub use ean13::ScanlineDecoder;

/// Symbology of a decoded symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BarcodeFormat {
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    Code39,
    Code128,
    Itf,
    QrCode,
    DataMatrix,
    Pdf417,
    Aztec,
}

impl BarcodeFormat {
    /// Linear symbols report two geometry points, area symbols four.
    pub fn is_linear(self) -> bool {
        !matches!(
            self,
            BarcodeFormat::QrCode
                | BarcodeFormat::DataMatrix
                | BarcodeFormat::Pdf417
                | BarcodeFormat::Aztec
        )
    }
}

impl fmt::Display for BarcodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BarcodeFormat::Ean13 => "EAN13",
            BarcodeFormat::Ean8 => "EAN8",
            BarcodeFormat::UpcA => "UPCA",
            BarcodeFormat::UpcE => "UPCE",
            BarcodeFormat::Code39 => "CODE39",
            BarcodeFormat::Code128 => "CODE128",
            BarcodeFormat::Itf => "ITF",
            BarcodeFormat::QrCode => "QR_CODE",
            BarcodeFormat::DataMatrix => "DATA_MATRIX",
            BarcodeFormat::Pdf417 => "PDF417",
            BarcodeFormat::Aztec => "AZTEC",
        };
        f.write_str(name)
    }
}

/// Point in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One decoded symbol. Never mutated after the decoder returns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    pub format: BarcodeFormat,
    pub points: Vec<Point>,
    pub captured_at: SystemTime,
}

impl Detection {
    pub fn new(text: impl Into<String>, format: BarcodeFormat, points: Vec<Point>) -> Self {
        Self {
            text: text.into(),
            format,
            points,
            captured_at: SystemTime::now(),
        }
    }

    /// Key used for log deduplication
    pub fn key(&self) -> (&str, BarcodeFormat) {
        (&self.text, self.format)
    }
}

/// External decode capability.
///
/// `Ok(vec![])` is the normal "nothing in this frame" outcome. Malformed input
/// must produce an error rather than a panic, and every call must return in
/// finite time.
pub trait Decoder: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DecodeError>;
}

/// Interchangeable decoder backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// Horizontal scanlines, EAN-13 / UPC-A
    #[default]
    Scanline,
    /// Horizontal and vertical scanlines, for symbols rotated by 90 degrees
    Omni,
}

impl DecoderKind {
    pub const ALL: [DecoderKind; 2] = [DecoderKind::Scanline, DecoderKind::Omni];

    /// Following backend in [`DecoderKind::ALL`], wrapping around
    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|&k| k == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    pub fn build(self, config: &DetectConfig) -> Arc<dyn Decoder> {
        let decoder = ScanlineDecoder::new(config.row_step, config.min_contrast, config.min_row_hits);
        match self {
            DecoderKind::Scanline => Arc::new(decoder),
            DecoderKind::Omni => Arc::new(decoder.with_columns()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names() {
        assert_eq!(BarcodeFormat::Ean13.to_string(), "EAN13");
        assert_eq!(BarcodeFormat::QrCode.to_string(), "QR_CODE");
        assert!(BarcodeFormat::UpcA.is_linear());
        assert!(!BarcodeFormat::DataMatrix.is_linear());
    }

    #[test]
    fn kinds_build_named_backends() {
        let config = DetectConfig::default();
        assert_eq!(DecoderKind::Scanline.build(&config).name(), "scanline");
        assert_eq!(DecoderKind::Omni.build(&config).name(), "omni");
    }

    #[test]
    fn next_cycles_through_all_kinds() {
        assert_eq!(DecoderKind::Scanline.next(), DecoderKind::Omni);
        assert_eq!(DecoderKind::Omni.next(), DecoderKind::Scanline);
    }
}
