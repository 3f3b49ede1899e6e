//! The per-frame engine.
//!
//! A [`Viewer`] owns everything the render side mutates (smoother, flash
//! detector, mapper) and reads the shared [`SnapshotBuffer`] once per frame.
//! It is synchronous; [`crate::render_loop::RenderLoop`] drives it on a timer
//! and hosts such as the terminal dashboard drive it from their own loop.
//!
//! One frame:
//!
//! ```text
//! latest = buffer.latest()
//!   none            -> clear visual set, wipe the surface once
//!   new generation  -> forget the old session, snap to it
//!   first ever      -> snap to it
//!   otherwise       -> smooth toward it, detect trades
//! fade(trail) ; glow + disc per entity ; ring per active flash
//! ```

use crate::buffer::SnapshotBuffer;
use crate::events::{FlashDetector, FLASH_DURATION};
use crate::mapper::{CoordinateMapper, Viewport};
use crate::palette::Palette;
use crate::smoother::{EntitySmoother, SmoothingMode, VisualEntity};
use crate::snapshot::{GroupSummary, MetricSet, Snapshot};
use crate::surface::{Surface, SurfaceError};
use nalgebra::Point2;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default display rate.
pub const DEFAULT_FRAME_RATE_HZ: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub smoothing: SmoothingMode,
    pub flash_duration: Duration,
    pub palette: Palette,
    pub frame_rate_hz: f64,
    pub viewport: Viewport,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            smoothing: SmoothingMode::default(),
            flash_duration: FLASH_DURATION,
            palette: Palette::default(),
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
            viewport: Viewport::default(),
        }
    }
}

impl ViewerConfig {
    /// Time between frames. Falls back to 60 Hz for unusable rates.
    pub fn frame_interval(&self) -> Duration {
        let hz = if self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0 {
            self.frame_rate_hz
        } else {
            DEFAULT_FRAME_RATE_HZ
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

/// Summary of one rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Tick of the snapshot drawn, `None` when nothing has arrived yet
    pub tick: Option<u64>,
    pub entities_drawn: usize,
    pub active_flashes: usize,
    pub entered: usize,
    pub removed: usize,
}

pub struct Viewer {
    config: ViewerConfig,
    buffer: Arc<SnapshotBuffer>,
    smoother: EntitySmoother,
    flashes: FlashDetector,
    mapper: CoordinateMapper,
    last_frame: Option<Duration>,
    current: Option<Arc<Snapshot>>,
    /// Buffer generation the visual state belongs to
    generation: u64,
    /// The surface still shows a scene that no longer exists
    clear_pending: bool,
    frames: u64,
}

impl Viewer {
    pub fn new(config: ViewerConfig, buffer: Arc<SnapshotBuffer>) -> Self {
        Self {
            smoother: EntitySmoother::new(config.smoothing),
            flashes: FlashDetector::new(config.flash_duration),
            mapper: CoordinateMapper::new(config.viewport),
            config,
            buffer,
            last_frame: None,
            current: None,
            generation: 0,
            clear_pending: false,
            frames: 0,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<SnapshotBuffer> {
        &self.buffer
    }

    /// Brings the visual state up to the newest snapshot, without drawing.
    pub fn advance(&mut self, now: Duration) -> FrameStats {
        let frame_dt = self
            .last_frame
            .map(|last| now.saturating_sub(last))
            .unwrap_or_else(|| self.config.frame_interval());
        self.last_frame = Some(now);

        let view = self.buffer.view();
        let new_session = view.generation != self.generation;
        if new_session {
            debug!("Buffer generation {} -> {}, dropping visual state", self.generation, view.generation);
            self.generation = view.generation;
            self.drop_scene();
        }

        let Some(snapshot) = view.latest else {
            self.drop_scene();
            return FrameStats::default();
        };

        let update = if new_session || view.total_pushed == 1 {
            self.smoother.snap(&snapshot.entities)
        } else {
            self.smoother.update(&snapshot.entities, frame_dt)
        };
        let triggered = self.flashes.observe(&update, now);
        if triggered > 0 || !update.removed.is_empty() {
            debug!(
                "Tick {}: {} trades, {} entered, {} removed",
                snapshot.tick,
                triggered,
                update.entered.len(),
                update.removed.len()
            );
        }

        let stats = FrameStats {
            tick: Some(snapshot.tick),
            entities_drawn: self.smoother.len(),
            active_flashes: 0,
            entered: update.entered.len(),
            removed: update.removed.len(),
        };
        self.current = Some(snapshot);
        stats
    }

    /// Draws the current visual state. Returns the number of flashes drawn.
    pub fn paint(&mut self, now: Duration, surface: &mut dyn Surface) -> Result<usize, SurfaceError> {
        let palette = &self.config.palette;
        let bounds = self.current.as_ref().and_then(|s| s.bounds);

        if std::mem::take(&mut self.clear_pending) {
            surface.clear();
        }
        surface.fade(palette.trail_overlay());

        for visual in self.smoother.entities() {
            let center = self.mapper.to_screen(visual.smoothed, bounds);
            let radius = palette.radius(visual.trade_count());
            if palette.glows(visual.trust()) {
                let (glow_radius, glow_color) = palette.glow(visual.trust(), radius);
                surface.fill_circle(center, glow_radius, glow_color);
            }
            surface.fill_circle(center, radius, palette.trust_color(visual.trust()));
        }

        let mut drawn = 0;
        for pulse in self.flashes.pulses(now) {
            let Some(visual) = self.smoother.get(pulse.entity_id) else {
                continue;
            };
            let center = self.mapper.to_screen(visual.smoothed, bounds);
            let (radius, color) = palette.flash_ring(palette.radius(visual.trade_count()), pulse.progress);
            surface.stroke_circle(center, radius, palette.flash_width, color);
            drawn += 1;
        }

        surface.finish_frame()?;
        Ok(drawn)
    }

    /// Advances and paints one frame. Draws nothing until a snapshot exists;
    /// once the buffer empties, the old scene is wiped in a single frame.
    pub fn render_frame(&mut self, now: Duration, surface: &mut dyn Surface) -> Result<FrameStats, SurfaceError> {
        let mut stats = self.advance(now);
        if stats.tick.is_some() {
            stats.active_flashes = self.paint(now, surface)?;
        } else if std::mem::take(&mut self.clear_pending) {
            surface.clear();
            surface.finish_frame()?;
        }
        self.frames += 1;
        Ok(stats)
    }

    /// Returns true if the viewport changed. Invalid sizes are ignored.
    pub fn resize(&mut self, width: f64, height: f64) -> bool {
        self.mapper.resize(width, height)
    }

    pub fn viewport(&self) -> Viewport {
        self.mapper.viewport()
    }

    /// The entities as drawn, in the order of the newest snapshot.
    pub fn visual_entities(&self) -> &[VisualEntity] {
        self.smoother.entities()
    }

    pub fn visual_entity(&self, id: u64) -> Option<&VisualEntity> {
        self.smoother.get(id)
    }

    /// Metrics of the newest buffered snapshot, unfiltered.
    pub fn latest_metrics(&self) -> Option<MetricSet> {
        self.buffer.latest().map(|s| s.metrics.clone())
    }

    /// Group metadata of the newest buffered snapshot.
    pub fn groups(&self) -> BTreeMap<i64, GroupSummary> {
        self.buffer
            .latest()
            .map(|s| s.groups.clone())
            .unwrap_or_default()
    }

    /// Snapshot the last frame was built from.
    pub fn current_snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.current.as_ref()
    }

    /// Where `id` would be drawn right now.
    pub fn screen_position(&self, id: u64) -> Option<Point2<f64>> {
        let bounds = self.current.as_ref().and_then(|s| s.bounds);
        self.smoother
            .get(id)
            .map(|v| self.mapper.to_screen(v.smoothed, bounds))
    }

    pub fn flash_intensity(&self, id: u64, now: Duration) -> Option<f64> {
        self.flashes.intensity(id, now)
    }

    pub fn is_flashing(&self, id: u64, now: Duration) -> bool {
        self.flashes.is_active(id, now)
    }

    /// Flash entries currently held (expired ones linger until the next paint).
    pub fn flash_count(&self) -> usize {
        self.flashes.len()
    }

    /// Ids with a held flash entry, ascending.
    pub fn flash_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.flashes.ids().collect();
        ids.sort_unstable();
        ids
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Forgets all render-side state. The buffer is left alone.
    pub fn reset(&mut self) {
        self.drop_scene();
        self.last_frame = None;
    }

    fn drop_scene(&mut self) {
        if self.current.is_some() {
            self.clear_pending = true;
        }
        self.smoother.clear();
        self.flashes.clear();
        self.current = None;
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("entities", &self.smoother.len())
            .field("flashes", &self.flashes.len())
            .field("viewport", &self.mapper.viewport())
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Entity;
    use crate::palette::Rgba;
    use crate::surface::{DisplayList, DrawCommand, PixelSurface};
    use approx::assert_relative_eq;

    const FRAME: Duration = Duration::from_millis(16);

    fn push(buffer: &SnapshotBuffer, tick: u64, entities: Vec<Entity>) {
        buffer.push(Snapshot::new(tick, entities, MetricSet::default()));
    }

    fn viewer() -> (Viewer, Arc<SnapshotBuffer>) {
        let buffer = SnapshotBuffer::shared();
        (Viewer::new(ViewerConfig::default(), Arc::clone(&buffer)), buffer)
    }

    #[test]
    fn test_two_snapshot_scenario() {
        let (mut viewer, buffer) = viewer();
        let mut surface = DisplayList::new();

        push(&buffer, 1, vec![Entity::new(1, 10.0, 10.0, 0.5, 0)]);
        viewer.render_frame(FRAME, &mut surface).unwrap();
        assert_eq!(viewer.visual_entity(1).unwrap().smoothed.x, 10.0);

        push(&buffer, 2, vec![Entity::new(1, 20.0, 10.0, 0.5, 1)]);
        let now = FRAME * 2;
        let stats = viewer.render_frame(now, &mut surface).unwrap();

        assert_relative_eq!(viewer.visual_entity(1).unwrap().smoothed.x, 11.5, epsilon = 1e-12);
        assert!(viewer.is_flashing(1, now));
        assert_eq!(stats.tick, Some(2));
        assert_eq!(stats.active_flashes, 1);
        assert_eq!(surface.rings().count(), 1);
    }

    #[test]
    fn test_disappearing_entity_is_dropped_with_its_flash() {
        let (mut viewer, buffer) = viewer();
        let mut surface = DisplayList::new();

        push(&buffer, 1, vec![Entity::new(1, 0.0, 0.0, 0.5, 0), Entity::new(2, 0.0, 0.0, 0.5, 0)]);
        viewer.render_frame(FRAME, &mut surface).unwrap();
        push(&buffer, 2, vec![Entity::new(1, 0.0, 0.0, 0.5, 1), Entity::new(2, 0.0, 0.0, 0.5, 0)]);
        viewer.render_frame(FRAME * 2, &mut surface).unwrap();
        assert_eq!(viewer.flash_count(), 1);

        push(&buffer, 3, vec![Entity::new(2, 0.0, 0.0, 0.5, 0)]);
        let stats = viewer.render_frame(FRAME * 3, &mut surface).unwrap();

        assert!(viewer.visual_entity(1).is_none());
        assert_eq!(viewer.flash_count(), 0);
        assert_eq!(stats.removed, 1);
        assert_eq!(surface.discs().count(), 1);
    }

    #[test]
    fn test_empty_buffer_draws_nothing() {
        let (mut viewer, _buffer) = viewer();
        let mut surface = DisplayList::new();
        let stats = viewer.render_frame(FRAME, &mut surface).unwrap();

        assert_eq!(stats, FrameStats::default());
        assert!(surface.commands().is_empty());
        assert_eq!(surface.frames(), 0);
        assert!(viewer.latest_metrics().is_none());
    }

    #[test]
    fn test_first_snapshot_snaps_every_frame() {
        let (mut viewer, buffer) = viewer();
        let mut surface = DisplayList::new();
        push(&buffer, 1, vec![Entity::new(4, 50.0, 60.0, 0.5, 2)]);

        for n in 1..=3 {
            let stats = viewer.render_frame(FRAME * n, &mut surface).unwrap();
            assert_eq!(stats.active_flashes, 0);
        }
        assert_eq!(viewer.visual_entity(4).unwrap().smoothed, Point2::new(50.0, 60.0));
    }

    #[test]
    fn test_cleared_buffer_starts_a_fresh_session() {
        let (mut viewer, buffer) = viewer();
        let mut surface = DisplayList::new();
        push(&buffer, 1, vec![Entity::new(1, 0.0, 0.0, 0.5, 0)]);
        push(&buffer, 2, vec![Entity::new(1, 0.0, 0.0, 0.5, 0)]);
        viewer.render_frame(FRAME, &mut surface).unwrap();

        // Two pushes land before the next frame, so the push count alone
        // cannot tell this apart from a continuing session
        buffer.clear();
        push(&buffer, 1, vec![Entity::new(1, 500.0, 500.0, 0.5, 7)]);
        push(&buffer, 2, vec![Entity::new(1, 500.0, 500.0, 0.5, 7)]);
        let now = FRAME * 2;
        let stats = viewer.render_frame(now, &mut surface).unwrap();

        assert_eq!(viewer.visual_entity(1).unwrap().smoothed, Point2::new(500.0, 500.0));
        assert!(!viewer.is_flashing(1, now));
        assert_eq!(stats.entered, 1);
        assert_eq!(stats.active_flashes, 0);
        assert_eq!(surface.rings().count(), 0);

        // The next frame smooths normally again
        push(&buffer, 3, vec![Entity::new(1, 600.0, 500.0, 0.5, 7)]);
        viewer.render_frame(FRAME * 3, &mut surface).unwrap();
        assert_relative_eq!(viewer.visual_entity(1).unwrap().smoothed.x, 515.0, epsilon = 1e-9);
    }

    #[test]
    fn test_emptied_buffer_wipes_pixels() {
        let (mut viewer, buffer) = viewer();
        let mut surface = PixelSurface::new(Viewport::default(), Rgba::BLACK);
        buffer.push(
            Snapshot::new(1, vec![Entity::new(1, 500.0, 500.0, 0.5, 0)], MetricSet::default())
                .with_bounds(1000.0, 1000.0),
        );
        viewer.render_frame(FRAME, &mut surface).unwrap();
        assert_ne!(surface.pixel(400, 300), Some(Rgba::BLACK));

        buffer.clear();
        let stats = viewer.render_frame(FRAME * 2, &mut surface).unwrap();
        assert_eq!(stats, FrameStats::default());
        assert!(viewer.visual_entities().is_empty());
        assert_eq!(surface.pixel(400, 300), Some(Rgba::BLACK));
    }

    #[test]
    fn test_emptied_buffer_finishes_one_blank_frame() {
        let (mut viewer, buffer) = viewer();
        let mut list = DisplayList::new();
        push(&buffer, 1, vec![Entity::new(1, 5.0, 5.0, 0.5, 0)]);
        viewer.render_frame(FRAME, &mut list).unwrap();
        buffer.clear();
        viewer.render_frame(FRAME * 2, &mut list).unwrap();
        viewer.render_frame(FRAME * 3, &mut list).unwrap();
        assert_eq!(list.discs().count(), 0);
        assert_eq!(list.frames(), 2);
    }

    #[test]
    fn test_resize_moves_drawn_positions_without_new_data() {
        let (mut viewer, buffer) = viewer();
        let mut surface = DisplayList::new();
        buffer.push(
            Snapshot::new(1, vec![Entity::new(1, 500.0, 500.0, 0.5, 0)], MetricSet::default())
                .with_bounds(1000.0, 1000.0),
        );
        viewer.render_frame(FRAME, &mut surface).unwrap();
        assert_eq!(viewer.screen_position(1), Some(Point2::new(400.0, 300.0)));

        assert!(viewer.resize(200.0, 100.0));
        assert!(!viewer.resize(0.0, 0.0));
        viewer.render_frame(FRAME * 2, &mut surface).unwrap();
        assert_eq!(viewer.screen_position(1), Some(Point2::new(100.0, 50.0)));
    }

    #[test]
    fn test_high_trust_gets_glow_under_disc() {
        let (mut viewer, buffer) = viewer();
        let mut surface = DisplayList::new();
        push(&buffer, 1, vec![Entity::new(1, 5.0, 5.0, 0.95, 0)]);
        viewer.render_frame(FRAME, &mut surface).unwrap();

        let palette = Palette::default();
        match surface.commands() {
            [DrawCommand::Fade(overlay), DrawCommand::FillCircle { radius: glow, .. }, DrawCommand::FillCircle { radius, .. }] => {
                assert_eq!(*overlay, palette.trail_overlay());
                assert_eq!(*glow, 8.0);
                assert_eq!(*radius, 4.0);
            }
            other => panic!("unexpected commands: {other:?}"),
        }
    }

    #[test]
    fn test_metrics_follow_buffer_not_frames() {
        let (viewer, buffer) = viewer();
        buffer.push(Snapshot::new(
            1,
            vec![],
            MetricSet {
                gini_coefficient: 0.3,
                ..Default::default()
            },
        ));
        assert_eq!(viewer.latest_metrics().unwrap().gini_coefficient, 0.3);
        assert!(viewer.visual_entities().is_empty());
    }
}
