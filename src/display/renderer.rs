//! Per-tick compositing of the current frame and the detection overlay.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use super::font;
use super::surface::{Color, Rect, Surface};
use crate::capture::FrameFeed;
use crate::detect::{Detection, Point};
use crate::error::RenderError;
use crate::pipeline::{Mode, ResultLog, ResultStore};
use crate::DisplayConfig;

/// Padding around the segment of a two-point symbol
const LINEAR_PADDING: f32 = 20.0;
const LINEAR_MARKER: f32 = 6.0;
const AREA_MARKER: f32 = 8.0;
const TEXT_SCALE: u32 = 2;
const BACKGROUND: Color = Color::rgb(64, 64, 64);
const LABEL_BACKGROUND: Color = Color::BLACK.with_alpha(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Ticking,
}

/// Frame placement inside the viewport: uniform scale, centred.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub scale: f32,
    pub dst: Rect,
}

impl Layout {
    /// `None` when either side is degenerate.
    pub fn fit(frame: (u32, u32), viewport: (u32, u32)) -> Option<Self> {
        let (fw, fh) = (frame.0 as f32, frame.1 as f32);
        let (vw, vh) = (viewport.0 as f32, viewport.1 as f32);
        if fw <= 0.0 || fh <= 0.0 || vw <= 0.0 || vh <= 0.0 {
            return None;
        }
        let scale = (vw / fw).min(vh / fh);
        let (w, h) = (fw * scale, fh * scale);
        Some(Self {
            scale,
            dst: Rect::new((vw - w) / 2.0, (vh - h) / 2.0, w, h),
        })
    }

    /// Frame coordinates to surface coordinates
    pub fn map(&self, p: Point) -> Point {
        Point::new(self.dst.x + p.x * self.scale, self.dst.y + p.y * self.scale)
    }
}

/// Overlay geometry of one detection, in surface coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// Closed polyline; the last point connects back to the first
    pub outline: Vec<Point>,
    pub markers: Vec<Point>,
    pub marker_size: f32,
    pub label: String,
    pub label_anchor: Point,
}

impl Shape {
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.outline.len();
        let closed = if n >= 2 { n } else { 0 };
        (0..closed).map(move |i| (self.outline[i], self.outline[(i + 1) % n]))
    }
}

pub fn overlay_shape(det: &Detection, layout: &Layout) -> Option<Shape> {
    let mapped: Vec<Point> = det.points.iter().map(|&p| layout.map(p)).collect();
    let first = *mapped.first()?;

    let (outline, marker_size) = match mapped.len() {
        1 => (Vec::new(), LINEAR_MARKER),
        2 => {
            let (a, b) = (mapped[0], mapped[1]);
            let (x0, x1) = (a.x.min(b.x) - LINEAR_PADDING, a.x.max(b.x) + LINEAR_PADDING);
            let (y0, y1) = (a.y.min(b.y) - LINEAR_PADDING, a.y.max(b.y) + LINEAR_PADDING);
            (
                vec![
                    Point::new(x0, y0),
                    Point::new(x1, y0),
                    Point::new(x1, y1),
                    Point::new(x0, y1),
                ],
                LINEAR_MARKER,
            )
        }
        _ => (mapped.clone(), AREA_MARKER),
    };

    let markers = if outline.is_empty() { vec![first] } else { outline.clone() };
    Some(Shape {
        outline,
        markers,
        marker_size,
        label: format!("{} ({})", det.text, det.format),
        label_anchor: Point::new(first.x - 5.0, first.y - 10.0),
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub drew_frame: bool,
    pub shapes: usize,
}

/// Distinct camera frames seen per second, refreshed once a second.
struct FpsMeter {
    window_start: Instant,
    frames: u32,
    last_sequence: Option<u64>,
    fps: Option<f32>,
}

impl FpsMeter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            last_sequence: None,
            fps: None,
        }
    }

    fn observe(&mut self, sequence: u64) {
        if self.last_sequence != Some(sequence) {
            self.last_sequence = Some(sequence);
            self.frames += 1;
        }
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = Some(self.frames as f32 / elapsed.as_secs_f32());
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }
}

pub struct Renderer {
    state: RenderState,
    feed: FrameFeed,
    store: Arc<ResultStore>,
    log: Arc<ResultLog>,
    show_overlay: bool,
    color: Color,
    thickness: f32,
    fps: FpsMeter,
}

impl Renderer {
    pub fn new(
        feed: FrameFeed,
        store: Arc<ResultStore>,
        log: Arc<ResultLog>,
        config: &DisplayConfig,
    ) -> Self {
        Self {
            state: RenderState::Idle,
            feed,
            store,
            log,
            show_overlay: config.show_overlay,
            color: Color::from(config.overlay_color),
            thickness: config.overlay_thickness,
            fps: FpsMeter::new(),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = RenderState::Ticking;
        self.fps = FpsMeter::new();
    }

    pub fn stop(&mut self) {
        self.state = RenderState::Idle;
    }

    pub fn show_overlay(&self) -> bool {
        self.show_overlay
    }

    pub fn set_show_overlay(&mut self, show: bool) {
        self.show_overlay = show;
    }

    /// Last completed FPS window, Camera mode only
    pub fn fps(&self) -> Option<f32> {
        self.fps.fps
    }

    /// Compose and present one frame. Does nothing while Idle.
    pub fn tick<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        mode: Mode,
    ) -> Result<TickReport, RenderError> {
        if self.state == RenderState::Idle {
            return Ok(TickReport::default());
        }
        let started = Instant::now();
        let viewport = surface.viewport();
        let mut report = TickReport::default();

        surface.clear(BACKGROUND);

        let frame = self.feed.latest().filter(|f| f.is_well_formed() && !f.is_empty());
        let layout = frame
            .as_deref()
            .and_then(|f| Layout::fit((f.width, f.height), viewport));

        match (frame.as_deref(), layout) {
            (Some(frame), Some(layout)) => {
                surface.draw_image(frame, layout.dst)?;
                report.drew_frame = true;

                if self.show_overlay {
                    let snapshot = self.store.snapshot();
                    for det in &snapshot.detections {
                        if let Some(shape) = overlay_shape(det, &layout) {
                            self.draw_shape(surface, &shape);
                            report.shapes += 1;
                        }
                    }
                }
                if mode == Mode::Camera {
                    self.fps.observe(frame.sequence);
                }
            }
            _ => {
                let text = match mode {
                    Mode::File => "Load an image file",
                    Mode::Camera => "No camera feed",
                };
                let (w, h) = font::text_size(text, TEXT_SCALE);
                let origin = Point::new(
                    (viewport.0 as f32 - w as f32) / 2.0,
                    (viewport.1 as f32 - h as f32) / 2.0,
                );
                surface.draw_text(text, origin, TEXT_SCALE, Color::WHITE);
            }
        }

        self.draw_status(surface, mode, viewport);
        surface.present()?;

        metrics::histogram!("render_time_us").record(started.elapsed().as_micros() as f64);
        Ok(report)
    }

    fn draw_shape<S: Surface + ?Sized>(&self, surface: &mut S, shape: &Shape) {
        for (from, to) in shape.edges() {
            surface.draw_line(from, to, self.color, self.thickness);
        }
        for &marker in &shape.markers {
            surface.fill_marker(marker, shape.marker_size, self.color);
        }

        let (w, h) = font::text_size(&shape.label, TEXT_SCALE);
        let anchor = shape.label_anchor;
        surface.fill_rect(
            Rect::new(anchor.x - 5.0, anchor.y - h as f32 - 5.0, w as f32 + 10.0, h as f32 + 10.0),
            LABEL_BACKGROUND,
        );
        surface.draw_text(
            &shape.label,
            Point::new(anchor.x, anchor.y - h as f32),
            TEXT_SCALE,
            Color::WHITE,
        );
    }

    fn draw_status<S: Surface + ?Sized>(&self, surface: &mut S, mode: Mode, viewport: (u32, u32)) {
        let status = format!("Detected: {} | {}", self.log.len(), mode);
        let (_, h) = font::text_size(&status, TEXT_SCALE);
        let y = viewport.1 as f32 - h as f32 - 8.0;
        surface.draw_text(&status, Point::new(8.0, y), TEXT_SCALE, Color::WHITE);

        if mode == Mode::Camera {
            if let Some(fps) = self.fps.fps {
                surface.draw_text(&format!("FPS: {:.1}", fps), Point::new(8.0, 8.0), TEXT_SCALE, Color::GREEN);
            }
        }
    }

    /// Tick every `period` until `step` returns `None`. `step` runs before
    /// each tick and yields the mode to render.
    #[instrument(skip_all)]
    pub fn run<S, F>(&mut self, surface: &mut S, period: Duration, mut step: F) -> Result<u64, RenderError>
    where
        S: Surface + ?Sized,
        F: FnMut(&mut Self, &mut S) -> Option<Mode>,
    {
        self.start();
        let mut next = Instant::now();
        let mut ticks = 0u64;

        while let Some(mode) = step(self, surface) {
            self.tick(surface, mode)?;
            ticks += 1;

            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }

        self.stop();
        debug!(ticks, "Render loop finished");
        Ok(ticks)
    }
}
