//! Synthetic market server.
//!
//! The `MarketFeed` plays the part of the simulation server the viewer
//! connects to:
//! - Agents bounce around a bounded world with constant velocity
//! - Close encounters (within the collision radius) are trade attempts, judged
//!   in both seller/buyer directions by skill match and trust quotas
//! - Trust decays periodically; aggregate and per-group metrics (average
//!   trust, Gini coefficient, trade success rate) are recomputed every step
//! - Every step can be encoded as a `state_update` envelope

use crate::error::SimError;
use marketview_core::snapshot::{GroupConfig, GroupMetrics};
use marketview_core::{Entity, GroupSummary, MetricSet, ServerMessage, Snapshot};
use nalgebra::{Point2, Vector2};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use std::collections::BTreeMap;

/// Number of distinct skills an agent can hold or need.
pub const SKILL_COUNT: u8 = 8;

/// Most groups the server will track.
pub const MAX_GROUPS: usize = 5;

/// Trust is decayed once every this many steps.
pub const DECAY_INTERVAL_TICKS: u64 = 30;

/// Per-group economic parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupParams {
    pub trust_quota: f64,
    /// Fraction of trust lost at each decay step
    pub trust_decay: f64,
    pub global_alpha: f64,
    pub global_beta: f64,
    pub speed_multiplier: f64,
}

impl Default for GroupParams {
    fn default() -> Self {
        Self {
            trust_quota: 0.5,
            trust_decay: 0.05,
            global_alpha: 0.10,
            global_beta: 0.05,
            speed_multiplier: 1.0,
        }
    }
}

impl From<&GroupParams> for GroupConfig {
    fn from(p: &GroupParams) -> Self {
        GroupConfig {
            trust_quota: p.trust_quota,
            trust_decay: p.trust_decay,
            global_alpha: p.global_alpha,
            global_beta: p.global_beta,
            speed_multiplier: p.speed_multiplier,
        }
    }
}

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Initial population
    pub agents: usize,
    /// Number of groups (clamped to 1..=MAX_GROUPS)
    pub groups: usize,
    pub bounds: (f64, f64),
    /// Seconds of simulated time per step
    pub dt: f64,
    pub max_speed: f64,
    pub collision_radius: f64,
    /// Std-dev of noise added to reported positions
    pub position_noise: f64,
    /// Whether snapshots carry `bounds`
    pub declare_bounds: bool,
    pub params: GroupParams,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            agents: 60,
            groups: 1,
            bounds: (1000.0, 1000.0),
            dt: 1.0 / 30.0,
            max_speed: 50.0,
            collision_radius: 8.0,
            position_noise: 0.0,
            declare_bounds: true,
            params: GroupParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct SimAgent {
    id: u64,
    position: Point2<f64>,
    velocity: Vector2<f64>,
    trust: f64,
    trust_quota: f64,
    skill_possessed: u8,
    skill_needed: u8,
    trade_count: u64,
    group_id: i64,
}

impl SimAgent {
    /// Constant-velocity step with mirror reflection at the walls.
    fn advance(&mut self, dt: f64, (width, height): (f64, f64)) {
        self.position += self.velocity * dt;
        reflect(&mut self.position.x, &mut self.velocity.x, width);
        reflect(&mut self.position.y, &mut self.velocity.y, height);
    }

    fn meets_quota(&self) -> bool {
        self.trust >= self.trust_quota
    }
}

fn reflect(pos: &mut f64, vel: &mut f64, limit: f64) {
    if *pos <= 0.0 {
        *pos = -*pos;
        *vel = -*vel;
    } else if *pos >= limit {
        *pos = 2.0 * limit - *pos;
        *vel = -*vel;
    }
    *pos = pos.clamp(0.0, limit);
}

/// Outcome of one directional trade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TradeCase {
    NoSkillMatch,
    NeitherMeetsQuota,
    SellerPenalized,
    BuyerPenalized,
    Trade,
}

/// Deterministic stand-in for the simulation server.
pub struct MarketFeed {
    config: FeedConfig,
    rng: ChaCha8Rng,
    agents: Vec<SimAgent>,
    groups: BTreeMap<i64, GroupParams>,
    next_id: u64,
    tick: u64,
    trade_count: u64,
    total_collisions: u64,
    noise: Option<Normal<f64>>,
}

impl MarketFeed {
    pub fn new(config: FeedConfig, rng: ChaCha8Rng) -> Self {
        let group_count = config.groups.clamp(1, MAX_GROUPS) as i64;
        let groups = (0..group_count).map(|g| (g, config.params.clone())).collect();
        let noise = (config.position_noise > 0.0)
            .then(|| Normal::new(0.0, config.position_noise).ok())
            .flatten();

        let mut feed = Self {
            rng,
            agents: Vec::with_capacity(config.agents),
            groups,
            next_id: 0,
            tick: 0,
            trade_count: 0,
            total_collisions: 0,
            noise,
            config,
        };
        for i in 0..feed.config.agents {
            feed.spawn_agent(i as i64 % group_count);
        }
        feed
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn agent_ids(&self) -> Vec<u64> {
        self.agents.iter().map(|a| a.id).collect()
    }

    pub fn group_ids(&self) -> Vec<i64> {
        self.groups.keys().copied().collect()
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.config.bounds
    }

    /// Replaces the parameters of one group (created if missing, up to the cap).
    pub fn set_group_params(&mut self, group: i64, params: GroupParams) -> bool {
        if !self.groups.contains_key(&group) && self.groups.len() >= MAX_GROUPS {
            return false;
        }
        for agent in self.agents.iter_mut().filter(|a| a.group_id == group) {
            agent.trust_quota = params.trust_quota;
        }
        self.groups.insert(group, params);
        true
    }

    /// Adds a random agent to `group`. Returns its id.
    pub fn spawn_agent(&mut self, group: i64) -> u64 {
        let params = self.groups.get(&group).cloned().unwrap_or_default();
        let (width, height) = self.config.bounds;
        let speed = Uniform::new_inclusive(-self.config.max_speed, self.config.max_speed);

        let skill_possessed = self.rng.gen_range(1..=SKILL_COUNT);
        let mut skill_needed = self.rng.gen_range(1..SKILL_COUNT);
        if skill_needed >= skill_possessed {
            skill_needed += 1;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.agents.push(SimAgent {
            id,
            position: Point2::new(self.rng.gen_range(0.0..=width), self.rng.gen_range(0.0..=height)),
            velocity: Vector2::new(speed.sample(&mut self.rng), speed.sample(&mut self.rng))
                * params.speed_multiplier,
            trust: self.rng.gen_range(0.3..=0.7),
            trust_quota: params.trust_quota,
            skill_possessed,
            skill_needed,
            trade_count: 0,
            group_id: group,
        });
        id
    }

    pub fn despawn(&mut self, id: u64) -> bool {
        let before = self.agents.len();
        self.agents.retain(|a| a.id != id);
        self.agents.len() != before
    }

    /// Removes one agent chosen at random.
    pub fn despawn_random(&mut self) -> Option<u64> {
        if self.agents.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.agents.len());
        Some(self.agents.remove(index).id)
    }

    /// Changes the world size. Agents outside are clamped back in.
    pub fn set_bounds(&mut self, width: f64, height: f64) {
        self.config.bounds = (width, height);
        for agent in &mut self.agents {
            agent.position.x = agent.position.x.clamp(0.0, width);
            agent.position.y = agent.position.y.clamp(0.0, height);
        }
    }

    /// Records a trade for one agent without an encounter (scripted scenarios).
    pub fn force_trade(&mut self, id: u64) -> bool {
        match self.agents.iter_mut().find(|a| a.id == id) {
            Some(agent) => {
                agent.trade_count += 1;
                self.trade_count += 1;
                true
            }
            None => false,
        }
    }

    /// Advances the world by one step.
    pub fn step(&mut self) {
        self.tick += 1;
        let dt = self.config.dt;
        let bounds = self.config.bounds;
        for agent in &mut self.agents {
            agent.advance(dt, bounds);
        }

        let radius2 = self.config.collision_radius.powi(2);
        let mut pairs = Vec::new();
        for i in 0..self.agents.len() {
            for j in (i + 1)..self.agents.len() {
                let d = self.agents[i].position - self.agents[j].position;
                if d.norm_squared() <= radius2 {
                    pairs.push((i, j));
                }
            }
        }
        self.total_collisions += pairs.len() as u64;

        for (i, j) in pairs {
            for (seller, buyer) in [(i, j), (j, i)] {
                if self.collide(seller, buyer) == TradeCase::Trade {
                    self.agents[i].trade_count += 1;
                    self.agents[j].trade_count += 1;
                    self.trade_count += 1;
                }
            }
        }

        if self.tick % DECAY_INTERVAL_TICKS == 0 {
            for agent in &mut self.agents {
                let decay = self
                    .groups
                    .get(&agent.group_id)
                    .map_or(0.0, |p| p.trust_decay);
                agent.trust = (agent.trust * (1.0 - decay).clamp(0.0, 1.0)).clamp(0.0, 1.0);
            }
        }
    }

    /// One directional trade attempt, `seller` offering to `buyer`.
    fn collide(&mut self, seller: usize, buyer: usize) -> TradeCase {
        let (s, b) = (&self.agents[seller], &self.agents[buyer]);
        if s.skill_possessed != b.skill_needed {
            return TradeCase::NoSkillMatch;
        }
        let params = |group: i64| self.groups.get(&group).cloned().unwrap_or_default();
        let (seller_params, buyer_params) = (params(s.group_id), params(b.group_id));

        let case = match (s.meets_quota(), b.meets_quota()) {
            (false, false) => TradeCase::NeitherMeetsQuota,
            (true, false) => TradeCase::SellerPenalized,
            (false, true) => TradeCase::BuyerPenalized,
            (true, true) => TradeCase::Trade,
        };

        let clamp = |t: f64| t.clamp(0.0, 1.0);
        match case {
            TradeCase::SellerPenalized => {
                self.agents[seller].trust = clamp(self.agents[seller].trust - seller_params.global_beta);
            }
            TradeCase::BuyerPenalized => {
                self.agents[buyer].trust = clamp(self.agents[buyer].trust - buyer_params.global_beta);
            }
            TradeCase::Trade => {
                self.agents[seller].trust = clamp(self.agents[seller].trust + seller_params.global_alpha);
                self.agents[buyer].trust = clamp(self.agents[buyer].trust + buyer_params.global_alpha);
            }
            TradeCase::NoSkillMatch | TradeCase::NeitherMeetsQuota => {}
        }
        case
    }

    /// Current state as the server would broadcast it.
    pub fn snapshot(&mut self) -> Snapshot {
        let (width, height) = self.config.bounds;
        let noise = self.noise;
        let rng = &mut self.rng;

        let entities: Vec<Entity> = self
            .agents
            .iter()
            .map(|a| {
                let (mut x, mut y) = (a.position.x, a.position.y);
                if let Some(n) = noise {
                    x = (x + n.sample(&mut *rng)).clamp(0.0, width);
                    y = (y + n.sample(&mut *rng)).clamp(0.0, height);
                }
                let mut entity = Entity::new(a.id, x, y, a.trust, a.trade_count).with_group(a.group_id);
                entity.vx = Some(a.velocity.x);
                entity.vy = Some(a.velocity.y);
                entity.trust_quota = Some(a.trust_quota);
                entity.skill_possessed = Some(a.skill_possessed);
                entity.skill_needed = Some(a.skill_needed);
                entity
            })
            .collect();

        let trusts: Vec<f64> = self.agents.iter().map(|a| a.trust).collect();
        let metrics = MetricSet {
            avg_trust: mean(&trusts),
            gini_coefficient: gini(&trusts),
            trade_success_rate: if self.total_collisions > 0 {
                self.trade_count as f64 / self.total_collisions as f64
            } else {
                0.0
            },
            trade_count: Some(self.trade_count),
            total_collisions: Some(self.total_collisions),
        };

        let groups = self
            .groups
            .iter()
            .map(|(&group_id, params)| {
                let trusts: Vec<f64> = self
                    .agents
                    .iter()
                    .filter(|a| a.group_id == group_id)
                    .map(|a| a.trust)
                    .collect();
                let summary = GroupSummary {
                    group_id,
                    metrics: GroupMetrics {
                        avg_trust: mean(&trusts),
                        gini_coefficient: gini(&trusts),
                        agent_count: trusts.len() as u64,
                    },
                    config: params.into(),
                    agent_count: trusts.len() as u64,
                };
                (group_id, summary)
            })
            .collect();

        let mut snapshot = Snapshot::new(self.tick, entities, metrics);
        if self.config.declare_bounds {
            snapshot = snapshot.with_bounds(width, height);
        }
        snapshot.active_group_id = Some(0);
        snapshot.groups = groups;
        snapshot
    }

    /// Current state as a `state_update` envelope.
    pub fn encode(&mut self) -> Result<String, SimError> {
        Ok(ServerMessage::StateUpdate(self.snapshot()).to_json()?)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Gini coefficient of non-negative values, clamped to [0, 1].
pub fn gini(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let total: f64 = sorted.iter().sum();
    if total <= 1e-12 {
        return 0.0;
    }
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (i + 1) as f64 * v)
        .sum();
    let n = n as f64;
    ((2.0 * weighted) / (n * total) - (n + 1.0) / n).clamp(0.0, 1.0)
}
