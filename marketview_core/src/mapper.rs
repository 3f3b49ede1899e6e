//! Coordinate Mapper - simulation space to viewport pixels.
//!
//! When the newest snapshot declares logical bounds `(W, H)` each axis is
//! scaled independently: `(x / W * vw, y / H * vh)`. Without bounds the
//! mapping is the identity. The viewport is read at draw time, so a resize
//! takes effect on the very next frame without waiting for new data.

use crate::snapshot::Bounds;
use nalgebra::Point2;

/// Default drawing area when the host has not sized the viewer yet.
pub const DEFAULT_VIEWPORT: (f64, f64) = (800.0, 600.0);

/// Largest accepted viewport edge, in pixels.
pub const MAX_VIEWPORT_EDGE: usize = 8192;

/// Drawable area in pixels. Always finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: f64,
    height: f64,
}

impl Viewport {
    /// Returns `None` for zero, negative, non-finite or oversized sizes.
    pub fn new(width: f64, height: f64) -> Option<Self> {
        let edge_ok = |v: f64| v.is_finite() && v > 0.0 && v <= MAX_VIEWPORT_EDGE as f64;
        (edge_ok(width) && edge_ok(height)).then_some(Self { width, height })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Whether a screen point falls inside `[0, w] x [0, h]`.
    pub fn contains(&self, point: &Point2<f64>) -> bool {
        (0.0..=self.width).contains(&point.x) && (0.0..=self.height).contains(&point.y)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT.0,
            height: DEFAULT_VIEWPORT.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoordinateMapper {
    viewport: Viewport,
}

impl CoordinateMapper {
    pub fn new(viewport: Viewport) -> Self {
        Self { viewport }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Updates the viewport. Invalid sizes are ignored and the last valid
    /// size is kept.
    ///
    /// Returns true if the viewport changed.
    pub fn resize(&mut self, width: f64, height: f64) -> bool {
        match Viewport::new(width, height) {
            Some(viewport) if viewport != self.viewport => {
                self.viewport = viewport;
                true
            }
            _ => false,
        }
    }

    /// Maps a simulation-space point onto the current viewport.
    pub fn to_screen(&self, point: Point2<f64>, bounds: Option<Bounds>) -> Point2<f64> {
        match bounds.filter(Bounds::is_valid) {
            Some(b) => Point2::new(
                point.x / b.width * self.viewport.width,
                point.y / b.height * self.viewport.height,
            ),
            None => point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_corners_map_to_viewport_corners() {
        let mapper = CoordinateMapper::new(Viewport::new(800.0, 600.0).unwrap());
        let bounds = Some(Bounds::new(1000.0, 1000.0));

        let origin = mapper.to_screen(Point2::new(0.0, 0.0), bounds);
        let corner = mapper.to_screen(Point2::new(1000.0, 1000.0), bounds);
        let middle = mapper.to_screen(Point2::new(500.0, 250.0), bounds);

        assert_eq!(origin, Point2::new(0.0, 0.0));
        assert_relative_eq!(corner.x, 800.0);
        assert_relative_eq!(corner.y, 600.0);
        assert_relative_eq!(middle.x, 400.0);
        assert_relative_eq!(middle.y, 150.0);
    }

    #[test]
    fn test_identity_without_bounds() {
        let mapper = CoordinateMapper::default();
        let p = Point2::new(1234.5, -3.0);
        assert_eq!(mapper.to_screen(p, None), p);
        // Degenerate bounds behave like no bounds
        assert_eq!(mapper.to_screen(p, Some(Bounds::new(0.0, 10.0))), p);
    }

    #[test]
    fn test_resize_applies_immediately() {
        let mut mapper = CoordinateMapper::default();
        let bounds = Some(Bounds::new(100.0, 100.0));
        assert!(mapper.resize(200.0, 100.0));

        let p = mapper.to_screen(Point2::new(50.0, 50.0), bounds);
        assert_relative_eq!(p.x, 100.0);
        assert_relative_eq!(p.y, 50.0);

        // Same size again is a no-op
        assert!(!mapper.resize(200.0, 100.0));
    }

    #[test]
    fn test_invalid_resize_keeps_last_size() {
        let mut mapper = CoordinateMapper::default();
        assert!(!mapper.resize(0.0, 0.0));
        assert!(!mapper.resize(-5.0, 10.0));
        assert!(!mapper.resize(f64::NAN, 10.0));
        assert!(!mapper.resize(MAX_VIEWPORT_EDGE as f64 + 1.0, 600.0));
        assert_eq!(mapper.viewport(), Viewport::default());
        assert!(Viewport::default().contains(&Point2::new(800.0, 0.0)));
        assert!(!Viewport::default().contains(&Point2::new(800.1, 0.0)));
    }
}
