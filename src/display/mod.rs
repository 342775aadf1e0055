//! Presentation: the renderer and the surfaces it draws on.

pub mod font;
pub mod renderer;
pub mod sdl;
pub mod surface;

pub use renderer::{Layout, RenderState, Renderer, Shape, TickReport};
pub use sdl::Sdl2Display;
pub use surface::{Color, Rect, Surface};
