//! Scanline EAN-13 / UPC-A reader.
//!
//! Each scanned line is binarised at the midpoint of its luminance range and
//! run-length encoded. A symbol is 59 runs: start guard (3), six left digits
//! (4 each), centre guard (5), six right digits (4 each), end guard (3),
//! spanning 95 modules. Lines are tried in both directions, so upside-down
//! symbols read too.

use tracing::trace;

use super::{BarcodeFormat, Decoder, Detection, Point};
use crate::capture::{Frame, PixelFormat};
use crate::error::DecodeError;

const SYMBOL_RUNS: usize = 59;
const SYMBOL_MODULES: f32 = 95.0;
const QUIET_ZONE_MODULES: f32 = 3.0;
const MAX_PATTERN_DISTANCE: f32 = 1.2;

/// Element widths (space, bar, space, bar) of the odd-parity left digits.
/// Right digits use the same widths starting with a bar.
const L_WIDTHS: [[u8; 4]; 10] = [
    [3, 2, 1, 1],
    [2, 2, 2, 1],
    [2, 1, 2, 2],
    [1, 4, 1, 1],
    [1, 1, 3, 2],
    [1, 2, 3, 1],
    [1, 1, 1, 4],
    [1, 3, 1, 2],
    [1, 2, 1, 3],
    [3, 1, 1, 2],
];

/// Even-parity left digits: the L widths reversed.
const G_WIDTHS: [[u8; 4]; 10] = [
    [1, 1, 2, 3],
    [1, 2, 2, 2],
    [2, 2, 1, 2],
    [1, 1, 4, 1],
    [2, 3, 1, 1],
    [1, 3, 2, 1],
    [4, 1, 1, 1],
    [2, 1, 3, 1],
    [3, 1, 2, 1],
    [2, 1, 1, 3],
];

/// Left-half parity (1 = G) encoding the implicit first digit, MSB first.
const FIRST_DIGIT_PARITY: [u8; 10] = [
    0b000000, 0b001011, 0b001101, 0b001110, 0b010011, 0b011001, 0b011100, 0b010101, 0b010110,
    0b011010,
];

/// Guard run indices within a symbol; each should be one module wide.
const GUARD_RUNS: [usize; 11] = [0, 1, 2, 27, 28, 29, 30, 31, 56, 57, 58];

#[derive(Debug, Clone, Copy)]
struct Run {
    dark: bool,
    start: usize,
    len: usize,
}

/// A symbol found on one line, positions along that line
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineHit {
    digits: [u8; 13],
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct Accum {
    digits: [u8; 13],
    vertical: bool,
    // Along-line extent and cross-line position sum
    min: usize,
    max: usize,
    across_sum: f64,
    hits: usize,
}

/// EAN-13 / UPC-A scanline decoder.
#[derive(Debug, Clone)]
pub struct ScanlineDecoder {
    row_step: u32,
    min_contrast: u8,
    min_row_hits: usize,
    columns: bool,
}

impl ScanlineDecoder {
    pub fn new(row_step: u32, min_contrast: u8, min_row_hits: usize) -> Self {
        Self {
            row_step: row_step.max(1),
            min_contrast,
            min_row_hits: min_row_hits.max(1),
            columns: false,
        }
    }

    /// Also scan columns, for symbols rotated by 90 degrees.
    pub fn with_columns(mut self) -> Self {
        self.columns = true;
        self
    }

    fn scan_lines(
        &self,
        frame: &Frame,
        vertical: bool,
        found: &mut Vec<Accum>,
    ) -> usize {
        let (count, length) = if vertical {
            (frame.width, frame.height as usize)
        } else {
            (frame.height, frame.width as usize)
        };
        let mut line = Vec::with_capacity(length);
        let mut scratch = Vec::with_capacity(length);
        let mut runs = Vec::new();
        let mut scanned = 0;

        let mut pos = (self.row_step / 2).min(count.saturating_sub(1));
        while pos < count {
            let ok = if vertical {
                frame.luma_column(pos, &mut line)
            } else {
                frame.luma_row(pos, &mut line)
            };
            if !ok {
                break;
            }
            scanned += 1;

            for hit in self.decode_line(&line, &mut scratch, &mut runs) {
                merge_hit(found, hit, vertical, pos);
            }
            pos += self.row_step;
        }
        scanned
    }

    /// Decode one line in both directions.
    fn decode_line(&self, line: &[u8], scratch: &mut Vec<u8>, runs: &mut Vec<Run>) -> Vec<LineHit> {
        let Some(threshold) = threshold(line, self.min_contrast) else {
            return Vec::new();
        };

        run_lengths(line, threshold, runs);
        let mut hits = find_symbols(runs);

        scratch.clear();
        scratch.extend(line.iter().rev());
        run_lengths(scratch, threshold, runs);
        let n = line.len();
        hits.extend(find_symbols(runs).into_iter().map(|h| LineHit {
            digits: h.digits,
            start: n - h.end,
            end: n - h.start,
        }));

        hits
    }
}

impl Decoder for ScanlineDecoder {
    fn name(&self) -> &str {
        if self.columns {
            "omni"
        } else {
            "scanline"
        }
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DecodeError> {
        if !matches!(
            frame.format,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Gray8
        ) {
            return Err(DecodeError::UnsupportedFormat(frame.format));
        }
        if !frame.is_well_formed() {
            return Err(DecodeError::MalformedFrame(format!(
                "{}x{} {:?} with {} bytes",
                frame.width,
                frame.height,
                frame.format,
                frame.data.len()
            )));
        }

        let mut found = Vec::new();
        let rows = self.scan_lines(frame, false, &mut found);
        let cols = if self.columns {
            self.scan_lines(frame, true, &mut found)
        } else {
            0
        };
        trace!(rows, cols, candidates = found.len(), "scanline pass");

        let detections = found
            .into_iter()
            .filter(|acc| {
                let lines = if acc.vertical { cols } else { rows };
                acc.hits >= self.min_row_hits.min(lines).max(1)
            })
            .map(|acc| to_detection(acc, frame))
            .collect();
        Ok(detections)
    }
}

fn merge_hit(found: &mut Vec<Accum>, hit: LineHit, vertical: bool, across: u32) {
    if let Some(acc) = found
        .iter_mut()
        .find(|acc| acc.digits == hit.digits && acc.vertical == vertical)
    {
        acc.min = acc.min.min(hit.start);
        acc.max = acc.max.max(hit.end);
        acc.across_sum += across as f64;
        acc.hits += 1;
    } else {
        found.push(Accum {
            digits: hit.digits,
            vertical,
            min: hit.start,
            max: hit.end,
            across_sum: across as f64,
            hits: 1,
        });
    }
}

fn to_detection(acc: Accum, frame: &Frame) -> Detection {
    let across = (acc.across_sum / acc.hits as f64) as f32;
    // `max` is exclusive
    let (a, b) = (acc.min as f32, acc.max.saturating_sub(1) as f32);
    let points = if acc.vertical {
        vec![Point::new(across, a), Point::new(across, b)]
    } else {
        vec![Point::new(a, across), Point::new(b, across)]
    };

    let text: String = acc.digits.iter().map(|d| char::from(b'0' + d)).collect();
    // A leading zero makes the symbol a UPC-A code
    let (text, format) = match text.strip_prefix('0') {
        Some(upc) => (upc.to_string(), BarcodeFormat::UpcA),
        None => (text, BarcodeFormat::Ean13),
    };

    Detection {
        text,
        format,
        points,
        captured_at: frame.captured_at,
    }
}

fn threshold(line: &[u8], min_contrast: u8) -> Option<u8> {
    let min = *line.iter().min()?;
    let max = *line.iter().max()?;
    if max - min < min_contrast.max(1) {
        return None;
    }
    Some(((min as u16 + max as u16) / 2) as u8)
}

fn run_lengths(line: &[u8], threshold: u8, runs: &mut Vec<Run>) {
    runs.clear();
    for (x, &v) in line.iter().enumerate() {
        let dark = v <= threshold;
        match runs.last_mut() {
            Some(run) if run.dark == dark => run.len += 1,
            _ => runs.push(Run {
                dark,
                start: x,
                len: 1,
            }),
        }
    }
}

fn find_symbols(runs: &[Run]) -> Vec<LineHit> {
    let mut hits = Vec::new();
    let mut i = 1;
    // A light run must precede and follow the symbol
    while i + SYMBOL_RUNS < runs.len() {
        if runs[i].dark && has_quiet_zones(runs, i) {
            if let Some(digits) = decode_symbol(&runs[i..i + SYMBOL_RUNS]) {
                let last = runs[i + SYMBOL_RUNS - 1];
                hits.push(LineHit {
                    digits,
                    start: runs[i].start,
                    end: last.start + last.len,
                });
                i += SYMBOL_RUNS;
                continue;
            }
        }
        i += 1;
    }
    hits
}

fn has_quiet_zones(runs: &[Run], i: usize) -> bool {
    let module = (runs[i].len + runs[i + 1].len + runs[i + 2].len) as f32 / 3.0;
    let quiet = module * QUIET_ZONE_MODULES;
    runs[i - 1].len as f32 >= quiet && runs[i + SYMBOL_RUNS].len as f32 >= quiet
}

fn decode_symbol(runs: &[Run]) -> Option<[u8; 13]> {
    let total: usize = runs.iter().map(|r| r.len).sum();
    let module = total as f32 / SYMBOL_MODULES;

    for &g in &GUARD_RUNS {
        let w = runs[g].len as f32 / module;
        if !(0.4..=2.0).contains(&w) {
            return None;
        }
    }

    let mut digits = [0u8; 13];
    let mut parity = 0u8;
    for d in 0..6 {
        let widths = element_widths(&runs[3 + 4 * d..]);
        let (digit, even) = match (
            best_match(widths, &L_WIDTHS),
            best_match(widths, &G_WIDTHS),
        ) {
            (Some(l), Some(g)) if g.1 < l.1 => (g.0, true),
            (Some(l), _) => (l.0, false),
            (None, Some(g)) => (g.0, true),
            (None, None) => return None,
        };
        digits[d + 1] = digit;
        parity = (parity << 1) | even as u8;
    }
    for d in 0..6 {
        let widths = element_widths(&runs[32 + 4 * d..]);
        digits[7 + d] = best_match(widths, &L_WIDTHS)?.0;
    }

    digits[0] = FIRST_DIGIT_PARITY.iter().position(|&p| p == parity)? as u8;
    checksum_ok(&digits).then_some(digits)
}

fn element_widths(runs: &[Run]) -> [usize; 4] {
    [runs[0].len, runs[1].len, runs[2].len, runs[3].len]
}

/// Closest digit pattern by L1 distance after scaling to 7 modules.
fn best_match(widths: [usize; 4], table: &[[u8; 4]; 10]) -> Option<(u8, f32)> {
    let sum: usize = widths.iter().sum();
    if sum == 0 {
        return None;
    }
    let scale = 7.0 / sum as f32;

    let mut best = (0u8, f32::MAX);
    for (digit, pattern) in table.iter().enumerate() {
        let dist: f32 = widths
            .iter()
            .zip(pattern)
            .map(|(&w, &p)| (w as f32 * scale - p as f32).abs())
            .sum();
        if dist < best.1 {
            best = (digit as u8, dist);
        }
    }
    (best.1 <= MAX_PATTERN_DISTANCE).then_some(best)
}

fn checksum_ok(digits: &[u8; 13]) -> bool {
    let sum: u32 = digits[..12]
        .iter()
        .enumerate()
        .map(|(i, &d)| if i % 2 == 0 { d as u32 } else { 3 * d as u32 })
        .sum();
    (10 - sum % 10) % 10 == digits[12] as u32
}
