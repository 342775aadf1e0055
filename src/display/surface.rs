//! Drawing target for the renderer.

use crate::capture::Frame;
use crate::detect::Point;
use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const GREEN: Color = Color::rgb(0, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Color::rgb(r, g, b)
    }
}

/// Axis-aligned rectangle in surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn centered(center: Point, w: f32, h: f32) -> Self {
        Self::new(center.x - w / 2.0, center.y - h / 2.0, w, h)
    }
}

/// Everything the [`Renderer`](super::Renderer) needs from a window.
///
/// Calls between `clear` and `present` build one presented frame.
pub trait Surface {
    /// Drawable size in pixels
    fn viewport(&self) -> (u32, u32);

    fn clear(&mut self, color: Color);

    /// Blit an RGB24 frame scaled into `dst`.
    fn draw_image(&mut self, frame: &Frame, dst: Rect) -> Result<(), RenderError>;

    fn draw_line(&mut self, from: Point, to: Point, color: Color, thickness: f32);

    fn fill_rect(&mut self, rect: Rect, color: Color);

    /// Square corner marker of side `size` centred on `center`.
    fn fill_marker(&mut self, center: Point, size: f32, color: Color) {
        self.fill_rect(Rect::centered(center, size, size), color);
    }

    /// Text in the built-in bitmap font, top-left at `origin`.
    fn draw_text(&mut self, text: &str, origin: Point, scale: u32, color: Color);

    fn present(&mut self) -> Result<(), RenderError>;
}
