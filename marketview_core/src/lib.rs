//! MarketView Core - client-side viewer for live market simulations
//!
//! A server pushes full state snapshots of a trading population at roughly
//! 30 Hz. This library turns that irregular stream into smooth display-rate
//! frames:
//! 1. **Ingest**: decode, validate and group-filter each message, then push it
//!    into a bounded [`SnapshotBuffer`] (depth 3)
//! 2. **Smoothing**: every frame moves each drawn agent 15% of the way toward
//!    its newest target ([`EntitySmoother`])
//! 3. **Events**: trade counter increases become 300 ms flash pulses
//!    ([`FlashDetector`])
//! 4. **Painting**: simulation space is mapped onto the viewport and drawn
//!    with a persistent fading trail ([`Viewer`], [`Surface`])
//!
//! [`RenderLoop`] drives a viewer on any [`marketview_env::ViewContext`].

pub mod buffer;
pub mod events;
pub mod ingest;
pub mod mapper;
pub mod palette;
pub mod render_loop;
pub mod smoother;
pub mod snapshot;
pub mod surface;
pub mod viewer;

#[cfg(feature = "dashboard")]
pub mod dashboard;

#[cfg(feature = "visualization")]
pub mod visualization;

// Re-export key types for convenience
pub use buffer::{BufferView, SnapshotBuffer, BUFFER_DEPTH};
pub use events::{FlashDetector, FlashEvent, FlashPulse, FLASH_DURATION};
pub use ingest::{pump, GroupFilter, Ingest, IngestOutcome, PumpStats};
pub use mapper::{CoordinateMapper, Viewport, MAX_VIEWPORT_EDGE};
pub use palette::{Palette, Rgba};
pub use render_loop::{RenderError, RenderLoop};
pub use smoother::{EntitySmoother, SmoothingMode, VisualEntity, DEFAULT_ALPHA};
pub use snapshot::{Bounds, DecodeError, Entity, GroupSummary, MetricSet, ServerMessage, Snapshot};
pub use surface::{DisplayList, DrawCommand, PixelSurface, Surface, SurfaceError};
pub use viewer::{FrameStats, Viewer, ViewerConfig};

#[cfg(feature = "dashboard")]
pub use dashboard::ViewerDashboard;

#[cfg(feature = "visualization")]
pub use visualization::RerunSink;
