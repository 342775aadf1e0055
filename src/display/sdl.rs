//! SDL2 window: the [`Surface`] the interactive scanner draws on, and the
//! event loop that feeds keyboard and drag-and-drop input to the pipeline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color as SdlColor, PixelFormatEnum};
use sdl2::rect::{Point as SdlPoint, Rect as SdlRect};
use sdl2::render::{BlendMode, Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{error, info, warn};

use super::font;
use super::renderer::Renderer;
use super::surface::{Color, Rect, Surface};
use crate::capture::{still, Frame, PixelFormat};
use crate::detect::{DecoderKind, Point};
use crate::error::RenderError;
use crate::pipeline::{Mode, ModeController};
use crate::{DetectConfig, DisplayConfig};

/// SDL2 Window Display
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, config: &DisplayConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let mut canvas = window.into_canvas().present_vsync().build()?;
        canvas.set_blend_mode(BlendMode::Blend);
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
        })
    }

    /// Render at `fps` until the window closes, Esc/Q is pressed, or
    /// `shutdown` is raised. `detect` builds the backends the D key cycles
    /// through.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        controller: &mut ModeController,
        renderer: &mut Renderer,
        detect: &DetectConfig,
        fps: u32,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let mut input = Input {
            detect,
            decoder: detect.decoder,
        };

        renderer.run(self, period, |renderer, _surface| {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                return None;
            }
            for event in event_pump.poll_iter() {
                if !input.handle_event(event, controller, renderer) {
                    return None;
                }
            }
            Some(controller.mode())
        })?;

        Ok(())
    }
}

struct Input<'a> {
    detect: &'a DetectConfig,
    decoder: DecoderKind,
}

impl Input<'_> {
    /// Returns `false` when the app should quit.
    fn handle_event(
        &mut self,
        event: Event,
        controller: &mut ModeController,
        renderer: &mut Renderer,
    ) -> bool {
        match event {
            Event::Quit { .. }
            | Event::KeyDown {
                keycode: Some(Keycode::Escape) | Some(Keycode::Q),
                ..
            } => {
                info!("Quit event received");
                return false;
            }
            Event::KeyDown {
                keycode: Some(Keycode::M),
                repeat: false,
                ..
            } => match controller.toggle() {
                Ok(mode) => info!("Switched to {} mode", mode),
                Err(e) => error!("Mode switch failed: {}", e),
            },
            Event::KeyDown {
                keycode: Some(Keycode::C),
                repeat: false,
                ..
            } => controller.clear_results(),
            Event::KeyDown {
                keycode: Some(Keycode::D),
                repeat: false,
                ..
            } => {
                let next = self.decoder.next();
                let decoder = next.build(self.detect);
                let name = decoder.name().to_owned();
                let result = controller.set_decoder(decoder);
                // A failed restart can still leave the new worker installed
                if controller.decoder_name() == name {
                    self.decoder = next;
                }
                match result {
                    Ok(()) => info!("Decoder: {}", name),
                    Err(e) => error!("Decoder switch failed: {}", e),
                }
            }
            Event::KeyDown {
                keycode: Some(Keycode::O),
                repeat: false,
                ..
            } => {
                let show = !renderer.show_overlay();
                renderer.set_show_overlay(show);
                info!(show, "Overlay toggled");
            }
            Event::DropFile { filename, .. } => load_dropped(controller, PathBuf::from(filename)),
            _ => {}
        }
        true
    }
}

fn load_dropped(controller: &mut ModeController, path: PathBuf) {
    if controller.mode() != Mode::File {
        warn!("Switch to file mode to load {}", path.display());
        return;
    }
    if !still::is_image_file(&path) {
        warn!("Not an image file: {}", path.display());
        return;
    }
    match controller.load_image(&path) {
        Ok(snapshot) => info!("{} barcode(s) in {}", snapshot.len(), path.display()),
        Err(e) => error!("{}", e),
    }
}

fn sdl_color(c: Color) -> SdlColor {
    SdlColor::RGBA(c.r, c.g, c.b, c.a)
}

fn sdl_rect(r: Rect) -> SdlRect {
    SdlRect::new(
        r.x.round() as i32,
        r.y.round() as i32,
        r.w.round().max(1.0) as u32,
        r.h.round().max(1.0) as u32,
    )
}

impl Surface for Sdl2Display {
    fn viewport(&self) -> (u32, u32) {
        self.canvas.output_size().unwrap_or_default()
    }

    fn clear(&mut self, color: Color) {
        self.canvas.set_draw_color(sdl_color(color));
        self.canvas.clear();
    }

    fn draw_image(&mut self, frame: &Frame, dst: Rect) -> Result<(), RenderError> {
        let format = match frame.format {
            PixelFormat::Rgb24 => PixelFormatEnum::RGB24,
            PixelFormat::Bgr24 => PixelFormatEnum::BGR24,
            other => return Err(RenderError::Surface(format!("cannot blit {:?}", other))),
        };

        let mut texture = self
            .texture_creator
            .create_texture_streaming(format, frame.width, frame.height)
            .map_err(|e| RenderError::Surface(e.to_string()))?;
        texture
            .update(None, &frame.data, (frame.width * 3) as usize)
            .map_err(|e| RenderError::Surface(e.to_string()))?;
        self.canvas
            .copy(&texture, None, Some(sdl_rect(dst)))
            .map_err(RenderError::Surface)
    }

    fn draw_line(&mut self, from: Point, to: Point, color: Color, thickness: f32) {
        self.canvas.set_draw_color(sdl_color(color));
        let t = thickness.round().max(1.0) as i32;
        for k in 0..t {
            let d = k - t / 2;
            let _ = self.canvas.draw_line(
                SdlPoint::new(from.x as i32 + d, from.y as i32 + d),
                SdlPoint::new(to.x as i32 + d, to.y as i32 + d),
            );
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.canvas.set_draw_color(sdl_color(color));
        let _ = self.canvas.fill_rect(sdl_rect(rect));
    }

    fn draw_text(&mut self, text: &str, origin: Point, scale: u32, color: Color) {
        let (x0, y0) = (origin.x as i32, origin.y as i32);
        let rects: Vec<SdlRect> = font::lit_pixels(text)
            .map(|(col, row)| {
                SdlRect::new(
                    x0 + (col * scale) as i32,
                    y0 + (row * scale) as i32,
                    scale,
                    scale,
                )
            })
            .collect();
        self.canvas.set_draw_color(sdl_color(color));
        let _ = self.canvas.fill_rects(&rects);
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.canvas.present();
        Ok(())
    }
}
