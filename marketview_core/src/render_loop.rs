//! Display-rate driver for a [`Viewer`].
//!
//! The loop runs as a task spawned through the [`ViewContext`], so the same
//! code runs against the tokio clock and the simulation clock. Each tick's
//! body is isolated: surface errors and panics are logged and counted, and
//! the next frame is still scheduled.
//!
//! `stop()` clears the running flag and then waits on the viewer lock, so a
//! frame already in progress finishes first and none starts afterwards.
//! Every `start()` opens a new epoch and a task only renders while its own
//! epoch is current, so a task aborted by `stop()` cannot draw alongside
//! the task of a later `start()`.

use crate::mapper::Viewport;
use crate::smoother::VisualEntity;
use crate::snapshot::{GroupSummary, MetricSet};
use crate::surface::{Surface, SurfaceError};
use crate::viewer::{FrameStats, Viewer};
use marketview_env::{TaskHandle, ViewContext};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("Render tick panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Default)]
struct LoopState {
    running: AtomicBool,
    epoch: AtomicU64,
    frames: AtomicU64,
    failures: AtomicU64,
}

impl LoopState {
    fn is_current(&self, epoch: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.epoch.load(Ordering::Acquire) == epoch
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RenderLoop<Ctx: ViewContext, S: Surface + Send + 'static> {
    ctx: Arc<Ctx>,
    viewer: Arc<Mutex<Viewer>>,
    surface: Arc<Mutex<S>>,
    state: Arc<LoopState>,
    task: Option<TaskHandle>,
}

impl<Ctx: ViewContext, S: Surface + Send + 'static> RenderLoop<Ctx, S> {
    pub fn new(ctx: Arc<Ctx>, viewer: Viewer, mut surface: S) -> Self {
        surface.resize(viewer.viewport());
        Self {
            ctx,
            viewer: Arc::new(Mutex::new(viewer)),
            surface: Arc::new(Mutex::new(surface)),
            state: Arc::new(LoopState::default()),
            task: None,
        }
    }

    /// Starts the frame task. Returns false if it was already running.
    pub fn start(&mut self) -> bool {
        if self.state.running.swap(true, Ordering::AcqRel) {
            return false;
        }

        let interval = lock(&self.viewer).config().frame_interval();
        let ctx = Arc::clone(&self.ctx);
        let viewer = Arc::clone(&self.viewer);
        let surface = Arc::clone(&self.surface);
        let state = Arc::clone(&self.state);
        let epoch = self.state.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        info!("Render loop starting at {:?} per frame (epoch {})", interval, epoch);
        self.task = Some(self.ctx.spawn("render-loop", async move {
            while state.is_current(epoch) {
                match tick(ctx.as_ref(), &viewer, &surface, &state, epoch) {
                    Ok(Some(_)) => {
                        state.frames.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        state.failures.fetch_add(1, Ordering::Relaxed);
                        warn!("Render tick failed: {}", e);
                    }
                }
                ctx.sleep(interval).await;
            }
        }));
        true
    }

    /// Cancels the frame task. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_running = self.state.running.swap(false, Ordering::AcqRel);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Waits out a frame that is mid-flight on another worker
        drop(lock(&self.viewer));
        if was_running {
            info!(
                "Render loop stopped after {} frames",
                self.state.frames.load(Ordering::Relaxed)
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Renders a single frame on the caller's thread, regardless of the task.
    pub fn render_once(&self) -> Result<FrameStats, RenderError> {
        let now = self.ctx.now();
        let result = guarded(|| {
            let mut viewer = lock(&self.viewer);
            let mut surface = lock(&self.surface);
            viewer.render_frame(now, &mut *surface)
        });
        match result {
            Ok(stats) => {
                self.state.frames.fetch_add(1, Ordering::Relaxed);
                Ok(stats)
            }
            Err(e) => {
                self.state.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Resizes the viewport and the surface. Invalid sizes are ignored.
    pub fn resize(&self, width: f64, height: f64) -> bool {
        let mut viewer = lock(&self.viewer);
        if !viewer.resize(width, height) {
            return false;
        }
        lock(&self.surface).resize(viewer.viewport());
        true
    }

    pub fn viewport(&self) -> Viewport {
        lock(&self.viewer).viewport()
    }

    /// Copy of the entities as last drawn.
    pub fn visual_entities(&self) -> Vec<VisualEntity> {
        lock(&self.viewer).visual_entities().to_vec()
    }

    pub fn latest_metrics(&self) -> Option<MetricSet> {
        lock(&self.viewer).latest_metrics()
    }

    pub fn groups(&self) -> BTreeMap<i64, GroupSummary> {
        lock(&self.viewer).groups()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.state.frames.load(Ordering::Relaxed)
    }

    pub fn tick_failures(&self) -> u64 {
        self.state.failures.load(Ordering::Relaxed)
    }

    /// Runs `f` with the viewer locked.
    pub fn with_viewer<R>(&self, f: impl FnOnce(&mut Viewer) -> R) -> R {
        f(&mut lock(&self.viewer))
    }

    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock(&self.surface))
    }
}

impl<Ctx: ViewContext, S: Surface + Send + 'static> Drop for RenderLoop<Ctx, S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One frame from the task of `epoch`. `Ok(None)` once that task has been
/// stopped or superseded.
fn tick<Ctx: ViewContext, S: Surface>(
    ctx: &Ctx,
    viewer: &Mutex<Viewer>,
    surface: &Mutex<S>,
    state: &LoopState,
    epoch: u64,
) -> Result<Option<FrameStats>, RenderError> {
    guarded(|| {
        let mut viewer = lock(viewer);
        if !state.is_current(epoch) {
            return Ok(None);
        }
        let mut surface = lock(surface);
        viewer.render_frame(ctx.now(), &mut *surface).map(Some)
    })
}

fn guarded<T>(body: impl FnOnce() -> Result<T, SurfaceError>) -> Result<T, RenderError> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result.map_err(RenderError::from),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(RenderError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SnapshotBuffer;
    use crate::palette::Rgba;
    use crate::snapshot::{Entity, Snapshot};
    use crate::surface::DisplayList;
    use crate::viewer::ViewerConfig;
    use marketview_env::TokioContext;
    use nalgebra::Point2;
    use std::time::Duration;

    fn seeded_buffer() -> Arc<SnapshotBuffer> {
        let buffer = SnapshotBuffer::shared();
        buffer.push(Snapshot::new(
            1,
            vec![Entity::new(1, 10.0, 10.0, 0.5, 0)],
            MetricSet::default(),
        ));
        buffer
    }

    #[tokio::test]
    async fn test_start_stop_no_frames_after_stop() {
        let buffer = seeded_buffer();
        let viewer = Viewer::new(ViewerConfig::default(), buffer);
        let mut render = RenderLoop::new(TokioContext::shared(), viewer, DisplayList::new());

        assert!(render.start());
        assert!(!render.start(), "second start is a no-op");
        tokio::time::sleep(Duration::from_millis(100)).await;
        render.stop();

        let frames = render.frames_rendered();
        assert!(frames > 0);
        assert!(!render.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(render.frames_rendered(), frames);
        assert_eq!(render.visual_entities().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_retires_the_previous_task() {
        let viewer = Viewer::new(ViewerConfig::default(), seeded_buffer());
        let mut render = RenderLoop::new(TokioContext::shared(), viewer, DisplayList::new());

        assert!(render.start());
        let first = render.state.epoch.load(Ordering::Acquire);
        render.stop();
        assert!(render.start());
        let second = render.state.epoch.load(Ordering::Acquire);
        assert_eq!(second, first + 1);

        // A frame from the aborted task, resumed late, must not draw
        let ctx = TokioContext::new();
        let stale = tick(&ctx, &render.viewer, &render.surface, &render.state, first).unwrap();
        assert!(stale.is_none());
        let current = tick(&ctx, &render.viewer, &render.surface, &render.state, second).unwrap();
        assert_eq!(current.and_then(|stats| stats.tick), Some(1));

        render.stop();
        assert!(tick(&ctx, &render.viewer, &render.surface, &render.state, second)
            .unwrap()
            .is_none());
    }

    struct FlakySurface {
        calls: u32,
    }

    impl Surface for FlakySurface {
        fn fade(&mut self, _overlay: Rgba) {
            self.calls += 1;
            if self.calls == 1 {
                panic!("first frame explodes");
            }
        }

        fn fill_circle(&mut self, _center: Point2<f64>, _radius: f64, _color: Rgba) {}

        fn stroke_circle(&mut self, _center: Point2<f64>, _radius: f64, _width: f64, _color: Rgba) {}

        fn finish_frame(&mut self) -> Result<(), SurfaceError> {
            if self.calls == 2 {
                return Err(SurfaceError::Backend("lost device".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tick_failures_do_not_stop_the_loop() {
        let viewer = Viewer::new(ViewerConfig::default(), seeded_buffer());
        let mut render = RenderLoop::new(TokioContext::shared(), viewer, FlakySurface { calls: 0 });

        render.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        render.stop();

        assert_eq!(render.tick_failures(), 2);
        assert!(render.frames_rendered() >= 1);
    }

    #[test]
    fn test_render_once_and_resize() {
        let viewer = Viewer::new(ViewerConfig::default(), seeded_buffer());
        let render = RenderLoop::new(TokioContext::shared(), viewer, DisplayList::new());

        let stats = render.render_once().unwrap();
        assert_eq!(stats.tick, Some(1));
        assert!(render.resize(1024.0, 768.0));
        assert!(!render.resize(0.0, 768.0));
        assert_eq!(render.with_surface(|s| s.viewport()), Viewport::new(1024.0, 768.0).unwrap());
        assert_eq!(render.frames_rendered(), 1);
    }
}
