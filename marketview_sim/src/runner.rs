//! Scenario runner - drives a feed, a faulty link and a viewer on virtual time.
//!
//! Every scenario uses the same loop at the viewer's frame rate:
//! 1. Apply the scenario script (faults, churn, resizes, filter changes)
//! 2. Step the feed at 30 Hz and hand encoded snapshots to the link
//! 3. Ingest whatever the link delivers by now
//! 4. Render a frame into a display list and check the viewer invariants
//!
//! The first violated invariant fails the run with the simulated time.

use crate::context::SimContext;
use crate::error::SimError;
use crate::exporter::{ExportFrame, SimExport};
use crate::feed::{FeedConfig, MarketFeed};
use crate::network::{LinkProfile, SimTransport, SimTransportController};
use crate::scenarios::ScenarioId;

use marketview_core::{
    DisplayList, Entity, GroupFilter, Ingest, IngestOutcome, ServerMessage, SnapshotBuffer, Surface, Viewer,
    ViewerConfig, VisualEntity, BUFFER_DEPTH,
};
use marketview_env::{TransportController, ViewContext};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rate at which the feed produces snapshots.
pub const PRODUCER_RATE_HZ: f64 = 30.0;

const FEED_STREAM: u64 = 1;
const NETWORK_STREAM: u64 = 2;
const SCRIPT_STREAM: u64 = 3;

/// Scripted events stop this long before the end so their effects land.
const SETTLE: Duration = Duration::from_millis(500);

/// Snapshots the stalled server flushes at once.
const BURST_SIZE: usize = 5;

/// Group hidden by the group filter scenario.
const HIDDEN_GROUP: i64 = 1;

/// Screen-space slack for rounding at the viewport edge.
const EDGE_TOLERANCE: f64 = 1e-6;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames rendered
    pub total_frames: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Entities drawn in the last frame
    pub final_entity_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Snapshots handed to the link
    pub snapshots_sent: u64,

    /// Frames lost on the link
    pub frames_dropped: u64,

    /// Largest send-to-delivery delay (ms)
    pub max_delay_ms: u64,

    /// Snapshots accepted into the buffer
    pub snapshots_pushed: u64,

    /// Messages that failed decoding or validation
    pub rejected: u64,

    /// Well-formed messages of an unknown kind
    pub ignored: u64,

    /// Snapshots that arrived with a lower tick than one already pushed
    pub out_of_order: u64,

    /// Snapshots replaced before any frame displayed them
    pub skipped_snapshots: u64,

    pub frames_rendered: u64,

    /// Flash rings drawn, summed over frames
    pub flashes_drawn: u64,

    pub max_concurrent_flashes: usize,

    pub entities_entered: u64,

    pub entities_removed: u64,

    /// Entities removed while their flash was still held
    pub removed_mid_flash: u64,

    /// Largest distance between a drawn position and its target
    pub max_lag: f64,

    /// Frames drawn while the group filter was in force
    pub filtered_frames: u64,

    pub resizes_applied: u64,

    pub resizes_ignored: u64,
}

/// Runs viewer scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Initial agent population
    num_agents: usize,

    /// Simulated duration in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_agents: usize) -> Self {
        Self {
            seed,
            num_agents,
            max_duration_secs: 10.0,
        }
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, Box::new(DisplayList::new()), None)
    }

    /// Runs a scenario, painting every frame onto `surface`.
    pub fn run_on(&self, scenario: ScenarioId, surface: Box<dyn Surface>) -> ScenarioResult {
        self.execute(scenario, surface, None)
    }

    /// Runs a scenario, capturing every `every_frames`-th frame.
    pub fn run_with_export(&self, scenario: ScenarioId, every_frames: u64) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(
            scenario,
            Box::new(DisplayList::new()),
            Some((&mut export, every_frames.max(1))),
        );
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(
        &self,
        scenario: ScenarioId,
        surface: Box<dyn Surface>,
        mut export: Option<(&mut SimExport, u64)>,
    ) -> ScenarioResult {
        info!(
            "Starting scenario {} ({}) seed={} agents={}",
            scenario.name(),
            scenario.description(),
            self.seed,
            self.num_agents
        );

        let end = Duration::from_secs_f64(self.max_duration_secs.max(0.0));
        let mut harness = Harness::new(scenario, self.seed, self.num_agents, end, surface);
        let frame_interval = harness.viewer.config().frame_interval();

        let total_frames = (end.as_secs_f64() / frame_interval.as_secs_f64()).round() as u64;

        let mut failure = None;
        for frame in 0..total_frames {
            let now = harness.ctx.now();
            if let Err(reason) = harness.frame(now, frame_interval) {
                failure = Some(format!("t={:.3}s: {}", now.as_secs_f64(), reason));
                break;
            }
            if let Some((export, every)) = export.as_mut() {
                if frame % *every == 0 {
                    export.add_frame(ExportFrame::capture(&harness.viewer, now));
                }
            }
            harness.ctx.advance_time(frame_interval);
        }

        if failure.is_none() {
            failure = harness.final_checks().err();
        }

        let link = harness.transport.stats();
        harness.metrics.frames_dropped = link.dropped;
        harness.metrics.max_delay_ms = link.max_delay_ms;
        harness.metrics.skipped_snapshots = harness
            .metrics
            .snapshots_pushed
            .saturating_sub(harness.displayed_snapshots);

        match &failure {
            None => info!("Scenario {} passed", scenario.name()),
            Some(reason) => warn!("Scenario {} failed: {}", scenario.name(), reason),
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure.is_none(),
            total_frames: harness.metrics.frames_rendered,
            final_time_secs: harness.ctx.now().as_secs_f64(),
            final_entity_count: harness.viewer.visual_entities().len(),
            failure_reason: failure,
            metrics: harness.metrics,
        }
    }
}

/// Scripted events that are checked once they have happened.
#[derive(Debug, Default)]
struct Script {
    bursts_flushed: u64,
    forced_trades: u64,
    /// End of the scripted blackout
    blackout_until: Option<Duration>,
    churn_rounds: u64,
    doomed: Option<(Duration, Vec<u64>)>,
    resizes_expected: (u64, u64),
    injected_invalid: u64,
    injected_unknown: u64,
    filter_hidden_at: Option<u64>,
    filter_restored_at: Option<u64>,
}

struct Harness {
    scenario: ScenarioId,
    ctx: SimContext,
    end: Duration,
    feed: MarketFeed,
    transport: SimTransport,
    controller: SimTransportController,
    ingest: Ingest,
    viewer: Viewer,
    surface: Box<dyn Surface>,
    rng: ChaCha8Rng,
    next_produce: Duration,
    produce_interval: Duration,
    pending: Vec<String>,
    script: Script,
    metrics: ScenarioMetrics,
    previous_ids: BTreeSet<u64>,
    max_pushed_tick: Option<u64>,
    last_displayed: Option<u64>,
    displayed_snapshots: u64,
}

impl Harness {
    fn new(scenario: ScenarioId, seed: u64, agents: usize, end: Duration, mut surface: Box<dyn Surface>) -> Self {
        let ctx = SimContext::new(seed);

        let mut feed_config = FeedConfig {
            agents,
            ..Default::default()
        };
        let mut link = LinkProfile::default();
        match scenario {
            ScenarioId::Jitter => {
                link.latency = Duration::from_millis(40);
                link.jitter = Duration::from_millis(80);
                link.loss = 0.05;
                feed_config.position_noise = 2.0;
            }
            ScenarioId::GroupFilter => feed_config.groups = 3,
            _ => {}
        }

        let (transport, controller) = SimTransport::pair(ctx.clone(), link, ctx.rng(NETWORK_STREAM));
        let buffer = SnapshotBuffer::shared();
        let viewer = Viewer::new(ViewerConfig::default(), Arc::clone(&buffer));
        surface.resize(viewer.viewport());

        Self {
            scenario,
            feed: MarketFeed::new(feed_config, ctx.rng(FEED_STREAM)),
            rng: ctx.rng(SCRIPT_STREAM),
            ctx,
            end,
            transport,
            controller,
            ingest: Ingest::new(buffer, GroupFilter::shared()),
            viewer,
            surface,
            next_produce: Duration::ZERO,
            produce_interval: Duration::from_secs_f64(1.0 / PRODUCER_RATE_HZ),
            pending: Vec::new(),
            script: Script::default(),
            metrics: ScenarioMetrics::default(),
            previous_ids: BTreeSet::new(),
            max_pushed_tick: None,
            last_displayed: None,
            displayed_snapshots: 0,
        }
    }

    fn frame(&mut self, now: Duration, interval: Duration) -> Result<(), String> {
        self.run_script(now, interval).map_err(|e| e.to_string())?;
        self.produce(now).map_err(|e| e.to_string())?;
        self.deliver();
        self.render(now)
    }

    /// True on the one frame whose interval contains the scripted moment
    /// `fraction * end`, provided the event can still settle before the end.
    fn at(&self, now: Duration, interval: Duration, fraction: f64) -> bool {
        let moment = self.end.mul_f64(fraction);
        moment + SETTLE <= self.end && moment >= now && moment < now + interval
    }

    /// True on the first frame of every `period`, outside the settle window.
    fn every(&self, now: Duration, interval: Duration, period: Duration) -> bool {
        !now.is_zero()
            && now + SETTLE <= self.end
            && now.as_nanos() % period.as_nanos() < interval.as_nanos()
    }

    fn run_script(&mut self, now: Duration, interval: Duration) -> Result<(), SimError> {
        match self.scenario {
            ScenarioId::Steady | ScenarioId::Jitter => {}
            ScenarioId::Burst => {
                if self.every(now, interval, Duration::from_millis(333)) {
                    self.force_trades(3);
                }
            }
            ScenarioId::Blackout => {
                let span = Duration::from_millis(1500).min(self.end.mul_f64(0.2));
                if self.at(now, interval, 0.3) {
                    info!("Blackout for {:?}", span);
                    self.controller.blackout(span);
                    self.script.blackout_until = Some(now + span);
                }
            }
            ScenarioId::Churn => {
                if self.every(now, interval, Duration::from_millis(500)) && self.script.doomed.is_none() {
                    let doomed = self.force_trades(3);
                    self.script.doomed = Some((now + Duration::from_millis(100), doomed));
                }
                let due = self.script.doomed.as_ref().is_some_and(|(at, _)| now >= *at);
                if due {
                    if let Some((_, ids)) = self.script.doomed.take() {
                        for id in &ids {
                            self.feed.despawn(*id);
                            self.feed.spawn_agent(0);
                        }
                        self.script.churn_rounds += 1;
                        debug!("Replaced agents {:?}", ids);
                    }
                }
            }
            ScenarioId::Resize => {
                if self.at(now, interval, 0.25) {
                    self.resize(1280.0, 720.0);
                    self.script.resizes_expected.0 += 1;
                }
                if self.at(now, interval, 0.4) {
                    self.resize(0.0, 600.0);
                    self.script.resizes_expected.1 += 1;
                }
                if self.at(now, interval, 0.55) {
                    let (w, h) = self.feed.bounds();
                    self.feed.set_bounds(w * 1.5, h * 1.5);
                }
                if self.at(now, interval, 0.7) {
                    self.resize(640.0, 480.0);
                    self.script.resizes_expected.0 += 1;
                }
            }
            ScenarioId::Malformed => {
                if self.every(now, interval, Duration::from_millis(250)) {
                    self.inject_malformed()?;
                }
            }
            ScenarioId::GroupFilter => {
                if self.at(now, interval, 0.2) {
                    let visible: Vec<i64> = self.feed.group_ids().into_iter().filter(|g| *g != HIDDEN_GROUP).collect();
                    self.ingest.filter().set_visible(visible);
                    self.script.filter_hidden_at = Some(self.max_pushed_tick.unwrap_or(0));
                    info!("Hiding group {}", HIDDEN_GROUP);
                }
                if self.at(now, interval, 0.6) {
                    self.ingest.filter().show_all();
                    self.script.filter_restored_at = Some(self.max_pushed_tick.unwrap_or(0));
                    info!("Showing all groups");
                }
            }
        }
        Ok(())
    }

    /// Records a trade for `count` random agents. Returns their ids.
    fn force_trades(&mut self, count: usize) -> Vec<u64> {
        let ids: Vec<u64> = self
            .feed
            .agent_ids()
            .choose_multiple(&mut self.rng, count)
            .copied()
            .collect();
        for id in &ids {
            if self.feed.force_trade(*id) {
                self.script.forced_trades += 1;
            }
        }
        ids
    }

    fn resize(&mut self, width: f64, height: f64) {
        if self.viewer.resize(width, height) {
            self.surface.resize(self.viewer.viewport());
            self.metrics.resizes_applied += 1;
        } else {
            self.metrics.resizes_ignored += 1;
        }
    }

    fn inject_malformed(&mut self) -> Result<(), SimError> {
        let round = self.script.injected_invalid + self.script.injected_unknown;
        let text = match round % 4 {
            0 => "{\"type\":\"state_update\",\"payload\":{\"tick\":".to_string(),
            1 => {
                let mut snapshot = self.feed.snapshot();
                let twin: Option<Entity> = snapshot.entities.first().cloned();
                snapshot.entities.extend(twin);
                ServerMessage::StateUpdate(snapshot).to_json()?
            }
            2 => "{\"type\":\"state_update\"}".to_string(),
            _ => "{\"type\":\"chat\",\"payload\":{\"text\":\"hello\"}}".to_string(),
        };
        if round % 4 == 3 {
            self.script.injected_unknown += 1;
        } else {
            self.script.injected_invalid += 1;
        }
        self.transport.send(text)?;
        Ok(())
    }

    fn produce(&mut self, now: Duration) -> Result<(), SimError> {
        while self.next_produce <= now {
            self.feed.step();
            self.pending.push(self.feed.encode()?);
            self.next_produce += self.produce_interval;
        }

        let flush = match self.scenario {
            ScenarioId::Burst => self.pending.len() >= BURST_SIZE,
            _ => !self.pending.is_empty(),
        };
        if flush {
            if self.pending.len() > 1 {
                self.script.bursts_flushed += 1;
            }
            for text in self.pending.drain(..) {
                self.transport.send(text)?;
                self.metrics.snapshots_sent += 1;
            }
        }
        Ok(())
    }

    fn deliver(&mut self) {
        for frame in self.transport.poll_due() {
            match self.ingest.ingest_bytes(&frame.payload) {
                Ok(IngestOutcome::Pushed { tick, .. }) => {
                    self.metrics.snapshots_pushed += 1;
                    if self.max_pushed_tick.is_some_and(|max| tick < max) {
                        self.metrics.out_of_order += 1;
                    }
                    self.max_pushed_tick = Some(self.max_pushed_tick.map_or(tick, |max| max.max(tick)));
                }
                Ok(IngestOutcome::Ignored { kind }) => {
                    debug!("Ignored '{}' message", kind);
                    self.metrics.ignored += 1;
                }
                Err(e) => {
                    debug!("Rejected frame {}: {}", frame.sequence, e);
                    self.metrics.rejected += 1;
                }
            }
        }
    }

    fn render(&mut self, now: Duration) -> Result<(), String> {
        let flashing_before: BTreeSet<u64> = self.viewer.flash_ids().into_iter().collect();
        let stats = self
            .viewer
            .render_frame(now, &mut self.surface)
            .map_err(|e| e.to_string())?;

        self.metrics.frames_rendered += 1;
        self.metrics.flashes_drawn += stats.active_flashes as u64;
        self.metrics.max_concurrent_flashes = self.metrics.max_concurrent_flashes.max(stats.active_flashes);
        self.metrics.entities_entered += stats.entered as u64;
        self.metrics.entities_removed += stats.removed as u64;
        if stats.tick.is_some() && stats.tick != self.last_displayed {
            self.displayed_snapshots += 1;
            self.last_displayed = stats.tick;
        }

        self.check_invariants(&flashing_before)
    }

    fn check_invariants(&mut self, flashing_before: &BTreeSet<u64>) -> Result<(), String> {
        let buffer = self.ingest.buffer();
        if buffer.len() > BUFFER_DEPTH {
            return Err(format!("buffer holds {} snapshots", buffer.len()));
        }
        for held in buffer.history() {
            let mut copy = (*held).clone();
            copy.validate()
                .map_err(|e| format!("buffer holds invalid snapshot {}: {}", held.tick, e))?;
        }

        let visual = self.viewer.visual_entities();
        let ids: Vec<u64> = visual.iter().map(|v| v.id).collect();
        let expected: Vec<u64> = buffer
            .latest()
            .map(|s| s.entities.iter().map(|e| e.id).collect())
            .unwrap_or_default();
        if ids != expected {
            return Err(format!(
                "drawing {} entities but the newest snapshot has {}",
                ids.len(),
                expected.len()
            ));
        }

        for v in visual {
            if !self.previous_ids.contains(&v.id) && v.smoothed != v.target.position() {
                return Err(format!(
                    "entity {} entered at ({:.2}, {:.2}) instead of its target",
                    v.id, v.smoothed.x, v.smoothed.y
                ));
            }
            self.metrics.max_lag = self.metrics.max_lag.max(v.lag());
        }

        if self.viewer.current_snapshot().is_some_and(|s| s.bounds.is_some()) {
            let viewport = self.viewer.viewport();
            for v in visual {
                let Some(p) = self.viewer.screen_position(v.id) else {
                    continue;
                };
                let inside = p.x >= -EDGE_TOLERANCE
                    && p.y >= -EDGE_TOLERANCE
                    && p.x <= viewport.width() + EDGE_TOLERANCE
                    && p.y <= viewport.height() + EDGE_TOLERANCE;
                if !inside {
                    return Err(format!("entity {} drawn off-screen at ({:.2}, {:.2})", v.id, p.x, p.y));
                }
            }
        }

        let current: BTreeSet<u64> = ids.into_iter().collect();
        if let Some(stale) = self.viewer.flash_ids().into_iter().find(|id| !current.contains(id)) {
            return Err(format!("flash held for absent entity {}", stale));
        }
        self.metrics.removed_mid_flash += flashing_before.iter().filter(|id| !current.contains(id)).count() as u64;

        if self.check_group_filter(visual)? {
            self.metrics.filtered_frames += 1;
        }

        self.previous_ids = current;
        Ok(())
    }

    /// Returns true if the frame was drawn under the filter.
    fn check_group_filter(&self, visual: &[VisualEntity]) -> Result<bool, String> {
        let Some(hidden_at) = self.script.filter_hidden_at else {
            return Ok(false);
        };
        let tick = self.viewer.current_snapshot().map(|s| s.tick);
        if self.script.filter_restored_at.is_some() || tick.map_or(true, |t| t <= hidden_at) {
            return Ok(false);
        }

        if let Some(v) = visual.iter().find(|v| v.group_id() == HIDDEN_GROUP) {
            return Err(format!("entity {} of hidden group {} is drawn", v.id, HIDDEN_GROUP));
        }
        let hidden_agents = self.viewer.groups().get(&HIDDEN_GROUP).map_or(0, |g| g.agent_count);
        if hidden_agents == 0 {
            return Err(format!("metadata for hidden group {} went missing", HIDDEN_GROUP));
        }
        Ok(true)
    }

    /// Scenario-level expectations, checked once the run has finished.
    fn final_checks(&self) -> Result<(), String> {
        let m = &self.metrics;
        let s = &self.script;

        if self.end >= SETTLE && m.snapshots_pushed == 0 {
            return Err("no snapshot ever reached the viewer".to_string());
        }

        match self.scenario {
            ScenarioId::Steady => {
                if m.rejected > 0 || self.transport.stats().dropped > 0 {
                    return Err(format!("clean link lost or rejected frames ({} rejected)", m.rejected));
                }
            }
            ScenarioId::Jitter => {}
            ScenarioId::Burst => {
                let skipped = m.snapshots_pushed.saturating_sub(self.displayed_snapshots);
                if s.bursts_flushed > 0 && skipped == 0 {
                    return Err("bursts never superseded a snapshot".to_string());
                }
                if s.forced_trades > 0 && m.flashes_drawn == 0 {
                    return Err("forced trades produced no flashes".to_string());
                }
            }
            ScenarioId::Blackout => {
                let skipped = m.snapshots_pushed.saturating_sub(self.displayed_snapshots);
                let released = s.blackout_until.is_some_and(|until| until + SETTLE <= self.end);
                if released && skipped == 0 {
                    return Err("release after blackout did not flood the buffer".to_string());
                }
            }
            ScenarioId::Churn => {
                if s.churn_rounds > 0 && (m.entities_removed == 0 || m.removed_mid_flash == 0) {
                    return Err(format!(
                        "churn removed {} entities, {} mid-flash",
                        m.entities_removed, m.removed_mid_flash
                    ));
                }
            }
            ScenarioId::Resize => {
                let (applied, ignored) = s.resizes_expected;
                if m.resizes_applied != applied || m.resizes_ignored != ignored {
                    return Err(format!(
                        "resizes applied/ignored {}/{}, expected {}/{}",
                        m.resizes_applied, m.resizes_ignored, applied, ignored
                    ));
                }
            }
            ScenarioId::Malformed => {
                if m.rejected != s.injected_invalid || m.ignored != s.injected_unknown {
                    return Err(format!(
                        "rejected/ignored {}/{}, injected {}/{}",
                        m.rejected, m.ignored, s.injected_invalid, s.injected_unknown
                    ));
                }
            }
            ScenarioId::GroupFilter => {
                if s.filter_hidden_at.is_some() && m.filtered_frames == 0 {
                    return Err(format!("group {} was never filtered out", HIDDEN_GROUP));
                }
                if s.filter_restored_at.is_some()
                    && !self.viewer.visual_entities().iter().any(|v| v.group_id() == HIDDEN_GROUP)
                {
                    return Err(format!("group {} never came back", HIDDEN_GROUP));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scenario_passes() {
        let runner = ScenarioRunner::new(42, 40).with_duration(5.0);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(result.passed, "{} failed: {:?}", scenario, result.failure_reason);
            assert_eq!(result.total_frames, 300);
            assert!(result.metrics.snapshots_pushed > 0);
        }
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let runner = ScenarioRunner::new(7, 30).with_duration(3.0);
        let a = runner.run(ScenarioId::Jitter);
        let b = runner.run(ScenarioId::Jitter);

        assert_eq!(a.metrics.snapshots_pushed, b.metrics.snapshots_pushed);
        assert_eq!(a.metrics.frames_dropped, b.metrics.frames_dropped);
        assert_eq!(a.metrics.out_of_order, b.metrics.out_of_order);
        assert_eq!(a.final_entity_count, b.final_entity_count);
    }

    #[test]
    fn test_steady_displays_every_agent() {
        let result = ScenarioRunner::new(1, 25).with_duration(2.0).run(ScenarioId::Steady);
        assert!(result.passed);
        assert_eq!(result.final_entity_count, 25);
        assert_eq!(result.metrics.rejected, 0);
        assert_eq!(result.metrics.entities_entered, 25);
    }

    #[test]
    fn test_burst_and_blackout_skip_snapshots() {
        let runner = ScenarioRunner::new(3, 20).with_duration(6.0);
        let burst = runner.run(ScenarioId::Burst);
        assert!(burst.metrics.skipped_snapshots > 0);
        assert!(burst.metrics.flashes_drawn > 0);

        let blackout = runner.run(ScenarioId::Blackout);
        assert!(blackout.passed, "{:?}", blackout.failure_reason);
        assert!(blackout.metrics.skipped_snapshots > 0);
        assert!(blackout.metrics.max_delay_ms >= 1000);
    }

    #[test]
    fn test_churn_purges_flashes_of_departed_agents() {
        let result = ScenarioRunner::new(11, 30).with_duration(4.0).run(ScenarioId::Churn);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.removed_mid_flash > 0);
        assert_eq!(result.final_entity_count, 30);
    }

    #[test]
    fn test_malformed_counts_match_injections() {
        let result = ScenarioRunner::new(5, 20).with_duration(3.0).run(ScenarioId::Malformed);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.rejected >= 3);
        assert!(result.metrics.ignored >= 1);
    }

    #[test]
    fn test_runs_on_a_pixel_surface() {
        use marketview_core::{Palette, PixelSurface, Viewport};

        let surface = PixelSurface::new(Viewport::default(), Palette::default().background);
        let result = ScenarioRunner::new(8, 15)
            .with_duration(1.0)
            .run_on(ScenarioId::Resize, Box::new(surface));
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.resizes_ignored, 1);
    }

    #[test]
    fn test_export_captures_frames() {
        let (result, export) = ScenarioRunner::new(2, 10)
            .with_duration(1.0)
            .run_with_export(ScenarioId::Steady, 6);
        assert!(result.passed);
        assert_eq!(export.frames.len(), 10);
        assert!(export.passed);
        assert!(export.frames.last().is_some_and(|f| f.entities.len() == 10));
    }
}
