//! Visual style: trust colour ramp, trade-count radius, glow and flash ring.

use serde::{Deserialize, Serialize};

/// Straight (non-premultiplied) colour, channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Rgba = Rgba::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque colour from a `0xRRGGBB` literal.
    pub fn rgb(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xff) as f32 / 255.0,
            g: ((hex >> 8) & 0xff) as f32 / 255.0,
            b: (hex & 0xff) as f32 / 255.0,
            a: 1.0,
        }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a: a.clamp(0.0, 1.0), ..self }
    }

    /// Linear interpolation, `t` clamped to `[0, 1]`.
    pub fn lerp(self, other: Rgba, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: f32, b: f32| a * (1.0 - t) + b * t;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

/// Styling parameters for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub low: Rgba,
    pub mid: Rgba,
    pub high: Rgba,
    pub background: Rgba,

    /// Alpha of the background overlay laid over the previous frame
    pub trail_alpha: f32,

    pub base_radius: f64,
    pub radius_per_trade: f64,
    pub max_radius: f64,

    /// Trust above which an entity gets a halo
    pub glow_threshold: f64,
    pub glow_scale: f64,
    pub glow_alpha: f32,

    /// Extra radius a flash ring grows over its window
    pub flash_expand: f64,
    pub flash_color: Rgba,
    pub flash_width: f64,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            low: Rgba::rgb(0xef4444),
            mid: Rgba::rgb(0xeab308),
            high: Rgba::rgb(0x22c55e),
            background: Rgba::rgb(0x0f172a),
            trail_alpha: 0.2,
            base_radius: 4.0,
            radius_per_trade: 0.5,
            max_radius: 12.0,
            glow_threshold: 0.8,
            glow_scale: 2.0,
            glow_alpha: 0.25,
            flash_expand: 14.0,
            flash_color: Rgba::WHITE,
            flash_width: 2.0,
        }
    }
}

impl Palette {
    /// Three-stop ramp: low at 0, mid at 0.5, high at 1. NaN maps to low.
    pub fn trust_color(&self, trust: f64) -> Rgba {
        let t = (if trust.is_nan() { 0.0 } else { trust.clamp(0.0, 1.0) }) as f32;
        if t <= 0.5 {
            self.low.lerp(self.mid, t * 2.0)
        } else {
            self.mid.lerp(self.high, (t - 0.5) * 2.0)
        }
    }

    pub fn radius(&self, trade_count: u64) -> f64 {
        (self.base_radius + trade_count as f64 * self.radius_per_trade).min(self.max_radius)
    }

    pub fn glows(&self, trust: f64) -> bool {
        trust > self.glow_threshold
    }

    /// Halo drawn under a high-trust disc.
    pub fn glow(&self, trust: f64, radius: f64) -> (f64, Rgba) {
        (radius * self.glow_scale, self.trust_color(trust).with_alpha(self.glow_alpha))
    }

    pub fn trail_overlay(&self) -> Rgba {
        self.background.with_alpha(self.trail_alpha)
    }

    /// Ring geometry for a flash `progress` of the way through its window.
    pub fn flash_ring(&self, base_radius: f64, progress: f64) -> (f64, Rgba) {
        let p = progress.clamp(0.0, 1.0);
        (
            base_radius + self.flash_expand * p,
            self.flash_color.with_alpha((1.0 - p) as f32),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trust_ramp_stops() {
        let palette = Palette::default();
        assert_eq!(palette.trust_color(0.0), palette.low);
        assert_eq!(palette.trust_color(0.5), palette.mid);
        assert_eq!(palette.trust_color(1.0), palette.high);
        assert_eq!(palette.trust_color(-3.0), palette.low);
        assert_eq!(palette.trust_color(7.0), palette.high);
        assert_eq!(palette.trust_color(f64::NAN), palette.low);

        let quarter = palette.trust_color(0.25);
        assert_relative_eq!(quarter.r, (palette.low.r + palette.mid.r) / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_radius_is_capped() {
        let palette = Palette::default();
        assert_eq!(palette.radius(0), 4.0);
        assert_eq!(palette.radius(4), 6.0);
        assert_eq!(palette.radius(1_000), 12.0);
    }

    #[test]
    fn test_flash_ring_expands_and_fades() {
        let palette = Palette::default();
        let (r0, c0) = palette.flash_ring(5.0, 0.0);
        let (r1, c1) = palette.flash_ring(5.0, 0.5);
        assert_eq!(r0, 5.0);
        assert_eq!(r1, 12.0);
        assert_eq!(c0.a, 1.0);
        assert_relative_eq!(c1.a, 0.5);
    }

    #[test]
    fn test_hex_and_quantize() {
        assert_eq!(Rgba::rgb(0xef4444).to_rgba8(), [0xef, 0x44, 0x44, 0xff]);
        assert!(Palette::default().glows(0.81));
        assert!(!Palette::default().glows(0.8));
    }
}
