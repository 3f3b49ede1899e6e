//! MarketView deterministic simulation harness
//!
//! Runs the real viewer pipeline against a synthetic market server over a
//! simulated link, with every source of non-determinism under control:
//! - **Time**: a virtual clock that moves only when the harness advances it
//!   (or a task sleeps on it)
//! - **Link**: latency, jitter, loss and blackouts on that clock
//! - **Randomness**: every stream derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  state_update  ┌──────────────┐  frames  ┌──────────────┐
//! │ MarketFeed │───────────────►│ SimTransport │─────────►│ Ingest       │
//! │  (30 Hz)   │                │ (faults)     │          │ + buffer (3) │
//! └────────────┘                └──────────────┘          └──────┬───────┘
//!                                                                │ newest
//!                                                         ┌──────▼───────┐
//!                                                         │ Viewer 60 Hz │
//!                                                         │ + invariants │
//!                                                         └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use marketview_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 60).run(ScenarioId::Blackout);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod feed;
mod network;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{ExportEntity, ExportFrame, SimExport};
pub use feed::{gini, FeedConfig, GroupParams, MarketFeed, DECAY_INTERVAL_TICKS, MAX_GROUPS, SKILL_COUNT};
pub use network::{LinkProfile, LinkStats, SimTransport, SimTransportController};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, PRODUCER_RATE_HZ};
pub use scenarios::ScenarioId;

#[cfg(test)]
mod tests {
    use super::*;
    use marketview_core::{pump, DisplayList, GroupFilter, Ingest, RenderLoop, SnapshotBuffer, Viewer, ViewerConfig};
    use marketview_env::ViewContext;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_render_loop_and_pump_on_virtual_clock() {
        let ctx = SimContext::shared(42);
        let (transport, _controller) = SimTransport::pair((*ctx).clone(), LinkProfile::default(), ctx.rng(2));
        let transport = Arc::new(transport);

        let feed_config = FeedConfig {
            agents: 12,
            ..Default::default()
        };
        let mut feed = MarketFeed::new(feed_config, ctx.rng(1));
        let producer_ctx = Arc::clone(&ctx);
        let producer_link = Arc::clone(&transport);
        let producer = ctx.spawn("producer", async move {
            for _ in 0..30 {
                feed.step();
                producer_link.send(feed.encode().unwrap()).unwrap();
                producer_ctx.sleep(Duration::from_millis(33)).await;
            }
            producer_link.close();
        });

        let buffer = SnapshotBuffer::shared();
        let ingest = Ingest::new(Arc::clone(&buffer), GroupFilter::shared());
        let viewer = Viewer::new(ViewerConfig::default(), Arc::clone(&buffer));
        let mut render = RenderLoop::new(Arc::clone(&ctx), viewer, DisplayList::new());
        assert!(render.start());

        let stats = pump(transport.as_ref(), &ingest).await;
        assert!(producer.is_finished());
        assert_eq!(stats.pushed, 30);
        assert_eq!(stats.rejected, 0);

        let mark = render.frames_rendered();
        while render.frames_rendered() < mark + 2 {
            tokio::task::yield_now().await;
        }
        render.stop();

        // Producer and render loop both sleep on the shared clock, so virtual
        // time runs ahead of the producer's own 30 x 33 ms
        assert!(ctx.now() >= Duration::from_millis(29 * 33));
        assert_eq!(buffer.total_pushed(), 30);
        assert_eq!(render.visual_entities().len(), 12);
        assert_eq!(render.latest_metrics().map(|m| m.trade_count.is_some()), Some(true));
    }
}
