//! Paint targets for the viewer.
//!
//! The viewer never clears: every frame starts with [`Surface::fade`], which
//! lays a translucent background overlay over whatever is already there.
//! Older frames therefore decay geometrically and moving agents leave
//! trails.

use crate::mapper::{Viewport, MAX_VIEWPORT_EDGE};
use crate::palette::Rgba;
use nalgebra::Point2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Surface backend error: {0}")]
    Backend(String),
}

/// Something the viewer can paint a frame onto.
pub trait Surface {
    /// Follows a viewport change. Most surfaces only care at draw time.
    fn resize(&mut self, _viewport: Viewport) {}

    /// Composites `overlay` over the whole surface.
    fn fade(&mut self, overlay: Rgba);

    /// Wipes the surface back to its background, trails included.
    fn clear(&mut self) {}

    fn fill_circle(&mut self, center: Point2<f64>, radius: f64, color: Rgba);

    fn stroke_circle(&mut self, center: Point2<f64>, radius: f64, width: f64, color: Rgba);

    /// Ends the frame and presents it, if the backend presents anything.
    fn finish_frame(&mut self) -> Result<(), SurfaceError> {
        Ok(())
    }
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn resize(&mut self, viewport: Viewport) {
        (**self).resize(viewport)
    }

    fn fade(&mut self, overlay: Rgba) {
        (**self).fade(overlay)
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn fill_circle(&mut self, center: Point2<f64>, radius: f64, color: Rgba) {
        (**self).fill_circle(center, radius, color)
    }

    fn stroke_circle(&mut self, center: Point2<f64>, radius: f64, width: f64, color: Rgba) {
        (**self).stroke_circle(center, radius, width, color)
    }

    fn finish_frame(&mut self) -> Result<(), SurfaceError> {
        (**self).finish_frame()
    }
}

// ============================================================================
// DISPLAY LIST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Fade(Rgba),
    FillCircle {
        center: Point2<f64>,
        radius: f64,
        color: Rgba,
    },
    StrokeCircle {
        center: Point2<f64>,
        radius: f64,
        width: f64,
        color: Rgba,
    },
}

/// Records the commands of the current frame. A `fade` starts a new frame.
#[derive(Debug, Clone, Default)]
pub struct DisplayList {
    commands: Vec<DrawCommand>,
    viewport: Viewport,
    frames: u64,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Frames finished so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Filled discs of the current frame, in draw order.
    pub fn discs(&self) -> impl Iterator<Item = (Point2<f64>, f64, Rgba)> + '_ {
        self.commands.iter().filter_map(|c| match *c {
            DrawCommand::FillCircle { center, radius, color } => Some((center, radius, color)),
            _ => None,
        })
    }

    /// Rings of the current frame.
    pub fn rings(&self) -> impl Iterator<Item = (Point2<f64>, f64, Rgba)> + '_ {
        self.commands.iter().filter_map(|c| match *c {
            DrawCommand::StrokeCircle { center, radius, color, .. } => Some((center, radius, color)),
            _ => None,
        })
    }
}

impl Surface for DisplayList {
    fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn fade(&mut self, overlay: Rgba) {
        self.commands.clear();
        self.commands.push(DrawCommand::Fade(overlay));
    }

    fn clear(&mut self) {
        self.commands.clear();
    }

    fn fill_circle(&mut self, center: Point2<f64>, radius: f64, color: Rgba) {
        self.commands.push(DrawCommand::FillCircle { center, radius, color });
    }

    fn stroke_circle(&mut self, center: Point2<f64>, radius: f64, width: f64, color: Rgba) {
        self.commands.push(DrawCommand::StrokeCircle {
            center,
            radius,
            width,
            color,
        });
    }

    fn finish_frame(&mut self) -> Result<(), SurfaceError> {
        self.frames += 1;
        Ok(())
    }
}

// ============================================================================
// PIXEL SURFACE
// ============================================================================

/// Software raster with source-over compositing. Channels are kept as `f32`
/// so long trails decay smoothly instead of stalling on 8-bit rounding.
#[derive(Debug, Clone)]
pub struct PixelSurface {
    width: usize,
    height: usize,
    background: Rgba,
    pixels: Vec<[f32; 3]>,
}

impl PixelSurface {
    pub fn new(viewport: Viewport, background: Rgba) -> Self {
        let (width, height) = raster_size(viewport);
        Self {
            width,
            height,
            background,
            pixels: vec![[background.r, background.g, background.b]; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Opaque colour at integer pixel `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let [r, g, b] = self.pixels[y * self.width + x];
        Some(Rgba::new(r, g, b, 1.0))
    }

    /// Row-major RGBA8 copy of the raster.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&[r, g, b]| Rgba::new(r, g, b, 1.0).to_rgba8())
            .collect()
    }

    fn blend(&mut self, index: usize, color: Rgba) {
        let a = color.a.clamp(0.0, 1.0);
        let px = &mut self.pixels[index];
        px[0] = color.r * a + px[0] * (1.0 - a);
        px[1] = color.g * a + px[1] * (1.0 - a);
        px[2] = color.b * a + px[2] * (1.0 - a);
    }

    /// Visits every pixel whose centre lies within `outer` of `center` and
    /// at least `inner` away from it.
    fn paint_annulus(&mut self, center: Point2<f64>, inner: f64, outer: f64, color: Rgba) {
        if !(outer > 0.0) || !center.x.is_finite() || !center.y.is_finite() {
            return;
        }
        let x0 = (center.x - outer).floor().max(0.0) as usize;
        let y0 = (center.y - outer).floor().max(0.0) as usize;
        let x1 = ((center.x + outer).ceil().max(0.0) as usize).min(self.width);
        let y1 = ((center.y + outer).ceil().max(0.0) as usize).min(self.height);

        let (inner2, outer2) = (inner.max(0.0).powi(2), outer * outer);
        for y in y0..y1 {
            let dy = y as f64 + 0.5 - center.y;
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - center.x;
                let d2 = dx * dx + dy * dy;
                if d2 <= outer2 && d2 >= inner2 {
                    self.blend(y * self.width + x, color);
                }
            }
        }
    }
}

/// One raster pixel per viewport pixel. Viewports never exceed
/// [`MAX_VIEWPORT_EDGE`], so the mapper and the raster agree.
fn raster_size(viewport: Viewport) -> (usize, usize) {
    let edge = |v: f64| (v.round() as usize).clamp(1, MAX_VIEWPORT_EDGE);
    (edge(viewport.width()), edge(viewport.height()))
}

impl Surface for PixelSurface {
    fn resize(&mut self, viewport: Viewport) {
        let (width, height) = raster_size(viewport);
        if (width, height) == (self.width, self.height) {
            return;
        }
        let bg = [self.background.r, self.background.g, self.background.b];
        self.width = width;
        self.height = height;
        self.pixels = vec![bg; width * height];
    }

    fn fade(&mut self, overlay: Rgba) {
        for index in 0..self.pixels.len() {
            self.blend(index, overlay);
        }
    }

    fn clear(&mut self) {
        let bg = [self.background.r, self.background.g, self.background.b];
        self.pixels.fill(bg);
    }

    fn fill_circle(&mut self, center: Point2<f64>, radius: f64, color: Rgba) {
        self.paint_annulus(center, 0.0, radius, color);
    }

    fn stroke_circle(&mut self, center: Point2<f64>, radius: f64, width: f64, color: Rgba) {
        let half = width.max(0.0) / 2.0;
        self.paint_annulus(center, radius - half, radius + half, color);
    }
}
