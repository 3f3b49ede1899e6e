//! Rerun sink for the viewer.
//!
//! Streams each finished frame to a Rerun viewer (or a `.rrd` file) as 2D
//! points: one layer for agent discs, one for glows, one for flash rings.
//! Trails are left to Rerun's own time scrubbing, so `fade` only marks the
//! start of a frame.
//!
//! Enable with the `visualization` feature flag.

use crate::mapper::Viewport;
use crate::palette::Rgba;
use crate::snapshot::MetricSet;
use crate::surface::{Surface, SurfaceError};
use nalgebra::Point2;
use rerun::{RecordingStream, RecordingStreamBuilder};

#[derive(Debug, Default)]
struct Layer {
    positions: Vec<[f32; 2]>,
    radii: Vec<f32>,
    colors: Vec<[u8; 4]>,
}

impl Layer {
    fn push(&mut self, center: Point2<f64>, radius: f64, color: Rgba) {
        self.positions.push([center.x as f32, center.y as f32]);
        self.radii.push(radius as f32);
        self.colors.push(color.to_rgba8());
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.radii.clear();
        self.colors.clear();
    }
}

/// [`Surface`] that logs frames to Rerun.
pub struct RerunSink {
    rec: RecordingStream,
    discs: Layer,
    glows: Layer,
    rings: Layer,
}

impl RerunSink {
    /// Spawns a Rerun viewer and streams to it.
    pub fn spawn(app_id: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let rec = RecordingStreamBuilder::new(app_id).spawn()?;
        Ok(Self::with_stream(rec))
    }

    /// Records to a file for later replay.
    pub fn to_file(app_id: &str, path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let rec = RecordingStreamBuilder::new(app_id).save(path)?;
        Ok(Self::with_stream(rec))
    }

    fn with_stream(rec: RecordingStream) -> Self {
        Self {
            rec,
            discs: Layer::default(),
            glows: Layer::default(),
            rings: Layer::default(),
        }
    }

    /// Logs the aggregate metrics as scalar series.
    pub fn log_metrics(&self, metrics: &MetricSet) -> Result<(), Box<dyn std::error::Error>> {
        self.rec.log("metrics/avg_trust", &rerun::Scalars::new([metrics.avg_trust]))?;
        self.rec.log("metrics/gini", &rerun::Scalars::new([metrics.gini_coefficient]))?;
        self.rec.log(
            "metrics/trade_success_rate",
            &rerun::Scalars::new([metrics.trade_success_rate]),
        )?;
        Ok(())
    }

    fn log_layer(&self, path: &str, layer: &Layer) -> Result<(), SurfaceError> {
        self.rec
            .log(
                path,
                &rerun::Points2D::new(layer.positions.iter().copied())
                    .with_radii(layer.radii.iter().copied())
                    .with_colors(layer.colors.iter().copied()),
            )
            .map_err(|e| SurfaceError::Backend(e.to_string()))
    }
}

impl Surface for RerunSink {
    fn resize(&mut self, viewport: Viewport) {
        let (w, h) = (viewport.width() as f32, viewport.height() as f32);
        let frame = rerun::LineStrips2D::new([[[0.0, 0.0], [w, 0.0], [w, h], [0.0, h], [0.0, 0.0]]])
            .with_colors([[60, 60, 60, 255]]);
        if let Err(e) = self.rec.log_static("view/frame", &frame) {
            tracing::warn!("Failed to log viewport frame: {}", e);
        }
    }

    fn fade(&mut self, _overlay: Rgba) {
        self.clear();
    }

    fn clear(&mut self) {
        self.discs.clear();
        self.glows.clear();
        self.rings.clear();
    }

    fn fill_circle(&mut self, center: Point2<f64>, radius: f64, color: Rgba) {
        // Halos are the only translucent fills
        if color.a < 1.0 {
            self.glows.push(center, radius, color);
        } else {
            self.discs.push(center, radius, color);
        }
    }

    fn stroke_circle(&mut self, center: Point2<f64>, radius: f64, _width: f64, color: Rgba) {
        self.rings.push(center, radius, color);
    }

    fn finish_frame(&mut self) -> Result<(), SurfaceError> {
        self.log_layer("view/glows", &self.glows)?;
        self.log_layer("view/agents", &self.discs)?;
        self.log_layer("view/flashes", &self.rings)?;
        Ok(())
    }
}
