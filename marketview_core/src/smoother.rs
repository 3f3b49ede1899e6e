//! Entity Smoother - per-entity exponential moving average on position.
//!
//! Snapshots arrive at an irregular ~30 Hz while frames are drawn at display
//! rate. Instead of jumping to each new target, every frame moves the drawn
//! position a fixed fraction of the remaining distance:
//!
//! ```text
//! s' = s + (target - s) * α        α = 0.15 per frame
//! ```
//!
//! The error shrinks by `(1 - α)` per frame. With the default
//! [`SmoothingMode::PerTick`] this is frame-rate dependent: at 120 Hz an agent
//! catches up twice as fast (in wall time) as at 60 Hz. The render rate is
//! assumed roughly stable. [`SmoothingMode::TimeConstant`] derives α from the
//! elapsed frame time instead (`α = 1 - e^{-Δt/τ}`).
//!
//! Only position is smoothed; trust, trade count and group are taken verbatim
//! from the newest target. New ids are snapped to their target, missing ids
//! are dropped at once.

use crate::snapshot::Entity;
use nalgebra::Point2;
use std::collections::HashMap;
use std::time::Duration;

/// Default blend factor per frame.
pub const DEFAULT_ALPHA: f64 = 0.15;

/// How the per-frame blend factor is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothingMode {
    /// Fixed fraction per rendered frame
    PerTick { alpha: f64 },

    /// Fraction derived from elapsed frame time and a time constant
    TimeConstant { tau: Duration },
}

impl Default for SmoothingMode {
    fn default() -> Self {
        SmoothingMode::PerTick { alpha: DEFAULT_ALPHA }
    }
}

impl SmoothingMode {
    /// Blend factor for a frame that took `frame_dt`, in [0, 1].
    pub fn blend_factor(&self, frame_dt: Duration) -> f64 {
        match *self {
            SmoothingMode::PerTick { alpha } => {
                if alpha.is_finite() {
                    alpha.clamp(0.0, 1.0)
                } else {
                    DEFAULT_ALPHA
                }
            }
            SmoothingMode::TimeConstant { tau } => {
                if tau.is_zero() {
                    return 1.0;
                }
                1.0 - (-frame_dt.as_secs_f64() / tau.as_secs_f64()).exp()
            }
        }
    }
}

/// Render-owned shadow of a server entity.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualEntity {
    pub id: u64,

    /// Position actually drawn, in simulation space
    pub smoothed: Point2<f64>,

    /// Trade count seen on the previous update
    pub last_trade_count: u64,

    /// Newest target, for the passthrough fields
    pub target: Entity,
}

impl VisualEntity {
    fn snapped(target: &Entity) -> Self {
        Self {
            id: target.id,
            smoothed: target.position(),
            last_trade_count: target.trade_count,
            target: target.clone(),
        }
    }

    pub fn trust(&self) -> f64 {
        self.target.trust
    }

    pub fn trade_count(&self) -> u64 {
        self.target.trade_count
    }

    pub fn group_id(&self) -> i64 {
        self.target.group_id
    }

    /// Remaining distance to the target.
    pub fn lag(&self) -> f64 {
        nalgebra::distance(&self.smoothed, &self.target.position())
    }
}

/// A strict increase of an entity's trade counter between two updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeTransition {
    pub id: u64,
    pub previous: u64,
    pub current: u64,
}

/// What changed in the visual set during one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmootherUpdate {
    /// Ids seen for the first time (snapped)
    pub entered: Vec<u64>,

    /// Ids no longer present (dropped), ascending
    pub removed: Vec<u64>,

    /// Trade counter increases for ids present before and after
    pub trades: Vec<TradeTransition>,
}

/// Keeps the visual entity set, in the order of the newest snapshot.
#[derive(Debug, Default)]
pub struct EntitySmoother {
    mode: SmoothingMode,
    entities: Vec<VisualEntity>,
    index: HashMap<u64, usize>,
}

impl EntitySmoother {
    pub fn new(mode: SmoothingMode) -> Self {
        Self {
            mode,
            entities: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn mode(&self) -> SmoothingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SmoothingMode) {
        self.mode = mode;
    }

    pub fn entities(&self) -> &[VisualEntity] {
        &self.entities
    }

    pub fn get(&self, id: u64) -> Option<&VisualEntity> {
        self.index.get(&id).map(|&i| &self.entities[i])
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.index.clear();
    }

    /// Replaces the visual set with the targets, without smoothing or trade
    /// detection.
    pub fn snap(&mut self, targets: &[Entity]) -> SmootherUpdate {
        let mut previous = self.take_previous();
        let mut update = SmootherUpdate::default();

        let next: Vec<VisualEntity> = targets
            .iter()
            .map(|target| {
                if previous.remove(&target.id).is_none() {
                    update.entered.push(target.id);
                }
                VisualEntity::snapped(target)
            })
            .collect();

        update.removed = sorted_keys(previous);
        self.install(next);
        update
    }

    /// Blends every known entity toward its target and reconciles the set.
    pub fn update(&mut self, targets: &[Entity], frame_dt: Duration) -> SmootherUpdate {
        let alpha = self.mode.blend_factor(frame_dt);
        let mut previous = self.take_previous();
        let mut update = SmootherUpdate::default();
        let mut next = Vec::with_capacity(targets.len());

        for target in targets {
            match previous.remove(&target.id) {
                Some(mut visual) => {
                    let goal = target.position();
                    visual.smoothed += (goal - visual.smoothed) * alpha;

                    if target.trade_count > visual.last_trade_count {
                        update.trades.push(TradeTransition {
                            id: target.id,
                            previous: visual.last_trade_count,
                            current: target.trade_count,
                        });
                    }
                    visual.last_trade_count = target.trade_count;
                    visual.target = target.clone();
                    next.push(visual);
                }
                None => {
                    update.entered.push(target.id);
                    next.push(VisualEntity::snapped(target));
                }
            }
        }

        update.removed = sorted_keys(previous);
        self.install(next);
        update
    }

    fn take_previous(&mut self) -> HashMap<u64, VisualEntity> {
        self.index.clear();
        std::mem::take(&mut self.entities)
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
    }

    fn install(&mut self, entities: Vec<VisualEntity>) {
        self.index = entities.iter().enumerate().map(|(i, v)| (v.id, i)).collect();
        self.entities = entities;
    }
}

fn sorted_keys(map: HashMap<u64, VisualEntity>) -> Vec<u64> {
    let mut keys: Vec<u64> = map.into_keys().collect();
    keys.sort_unstable();
    keys
}
