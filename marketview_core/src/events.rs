//! Event Detector - turns trade counter increases into short visual pulses.
//!
//! A strict increase of `trade_count` between two observed states records a
//! [`FlashEvent`] for that id (restarting any flash already running). The draw
//! pass asks for [`FlashDetector::pulses`], which also drops flashes whose
//! window has elapsed; there is no separate expiry timer. Flashes are purged
//! as soon as the smoother drops their entity, so churn cannot accumulate
//! stale entries.

use crate::smoother::SmootherUpdate;
use std::collections::HashMap;
use std::time::Duration;

/// How long a trade flash stays visible.
pub const FLASH_DURATION: Duration = Duration::from_millis(300);

/// Active flash for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashEvent {
    pub entity_id: u64,
    pub start: Duration,
}

impl FlashEvent {
    /// Fraction of the window elapsed at `now`, or `None` once it is over.
    pub fn progress(&self, now: Duration, duration: Duration) -> Option<f64> {
        let elapsed = now.saturating_sub(self.start);
        if elapsed >= duration {
            return None;
        }
        Some(elapsed.as_secs_f64() / duration.as_secs_f64())
    }
}

/// One flash to draw this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlashPulse {
    pub entity_id: u64,

    /// 0.0 at trigger, approaching 1.0 at expiry
    pub progress: f64,
}

impl FlashPulse {
    /// Opacity/intensity, linear and strictly decreasing over the window.
    pub fn intensity(&self) -> f64 {
        1.0 - self.progress
    }
}

/// Owns the active flashes, at most one per entity.
#[derive(Debug)]
pub struct FlashDetector {
    duration: Duration,
    active: HashMap<u64, FlashEvent>,
}

impl Default for FlashDetector {
    fn default() -> Self {
        Self::new(FLASH_DURATION)
    }
}

impl FlashDetector {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            active: HashMap::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Applies a smoother update: trades start flashes, removals purge them.
    ///
    /// Returns the number of flashes (re)started.
    pub fn observe(&mut self, update: &SmootherUpdate, now: Duration) -> usize {
        for id in &update.removed {
            self.active.remove(id);
        }
        for trade in &update.trades {
            self.trigger(trade.id, now);
        }
        update.trades.len()
    }

    /// Starts (or restarts) the flash for `entity_id`.
    pub fn trigger(&mut self, entity_id: u64, now: Duration) {
        self.active.insert(entity_id, FlashEvent { entity_id, start: now });
    }

    pub fn forget(&mut self, entity_id: u64) {
        self.active.remove(&entity_id);
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn get(&self, entity_id: u64) -> Option<&FlashEvent> {
        self.active.get(&entity_id)
    }

    /// True while the flash window for `entity_id` is running.
    pub fn is_active(&self, entity_id: u64, now: Duration) -> bool {
        self.intensity(entity_id, now).is_some()
    }

    /// `1 - progress` for a running flash.
    pub fn intensity(&self, entity_id: u64, now: Duration) -> Option<f64> {
        self.active
            .get(&entity_id)
            .and_then(|flash| flash.progress(now, self.duration))
            .map(|progress| 1.0 - progress)
    }

    /// Entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Ids with a held flash entry, unordered.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.active.keys().copied()
    }

    /// Pulses to draw at `now`, ordered by entity id. Expired entries are
    /// removed here.
    pub fn pulses(&mut self, now: Duration) -> Vec<FlashPulse> {
        let duration = self.duration;
        let mut pulses = Vec::with_capacity(self.active.len());
        self.active.retain(|&entity_id, flash| match flash.progress(now, duration) {
            Some(progress) => {
                pulses.push(FlashPulse { entity_id, progress });
                true
            }
            None => false,
        });
        pulses.sort_by_key(|p| p.entity_id);
        pulses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smoother::TradeTransition;
    use approx::assert_relative_eq;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn trade(id: u64) -> SmootherUpdate {
        SmootherUpdate {
            trades: vec![TradeTransition { id, previous: 0, current: 1 }],
            ..Default::default()
        }
    }

    #[test]
    fn test_trade_creates_single_flash() {
        let mut detector = FlashDetector::default();
        assert_eq!(detector.observe(&trade(5), ms(1_000)), 1);
        assert_eq!(detector.len(), 1);
        assert!(detector.is_active(5, ms(1_000)));
        assert!(!detector.is_active(6, ms(1_000)));
    }

    #[test]
    fn test_intensity_strictly_decreases_then_expires() {
        let mut detector = FlashDetector::default();
        detector.trigger(1, ms(0));

        let mut last = f64::INFINITY;
        for t in (0..300).step_by(25) {
            let intensity = detector.intensity(1, ms(t)).expect("still active");
            assert!(intensity < last, "intensity must fall over the window");
            last = intensity;
        }
        assert_relative_eq!(detector.intensity(1, ms(150)).unwrap(), 0.5, epsilon = 1e-9);
        assert!(detector.intensity(1, ms(300)).is_none());
    }

    #[test]
    fn test_retrigger_restarts_timer() {
        let mut detector = FlashDetector::default();
        detector.trigger(1, ms(0));
        detector.observe(&trade(1), ms(250));

        assert_eq!(detector.len(), 1);
        assert!(detector.is_active(1, ms(400)));
        assert!(!detector.is_active(1, ms(550)));
    }

    #[test]
    fn test_pulses_sweep_expired_lazily() {
        let mut detector = FlashDetector::default();
        detector.trigger(1, ms(0));
        detector.trigger(2, ms(200));

        // Expired but still held until a draw pass runs
        assert_eq!(detector.len(), 2);
        let pulses = detector.pulses(ms(350));
        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses[0].entity_id, 2);
        assert_relative_eq!(pulses[0].intensity(), 0.5, epsilon = 1e-9);
        assert_eq!(detector.len(), 1);

        assert!(detector.pulses(ms(500)).is_empty());
        assert!(detector.is_empty());
    }

    #[test]
    fn test_removed_entities_purge_flash() {
        let mut detector = FlashDetector::default();
        detector.trigger(9, ms(0));
        let update = SmootherUpdate {
            removed: vec![9],
            ..Default::default()
        };
        detector.trigger(4, ms(5));
        detector.observe(&update, ms(10));
        assert!(detector.get(9).is_none());
        assert_eq!(detector.ids().collect::<Vec<_>>(), vec![4]);
    }
}
