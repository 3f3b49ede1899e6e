//! Simulated snapshot link with fault injection.
//!
//! Frames are scheduled on the virtual clock: each send is either dropped
//! (loss) or given a delivery time of `now + latency + U(0, jitter)`. While a
//! blackout is active every frame is held until the blackout ends and then
//! released together, which is what a stalled socket looks like from the
//! client side.

use crate::context::SimContext;
use async_trait::async_trait;
use marketview_env::{EnvError, SessionId, SnapshotTransport, TransportController, ViewContext, WireFrame};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Bernoulli, Distribution};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Link characteristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkProfile {
    pub latency: Duration,
    /// Upper bound of the extra random delay per frame
    pub jitter: Duration,
    /// Probability a frame is lost (0.0 - 1.0)
    pub loss: f64,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            jitter: Duration::ZERO,
            loss: 0.0,
        }
    }
}

impl LinkProfile {
    pub fn clean() -> Self {
        Self {
            latency: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub max_delay_ms: u64,
}

struct LinkState {
    profile: LinkProfile,
    blackout_until: Option<Duration>,
    rng: ChaCha8Rng,
    /// Keyed by (delivery time, sequence) so equal times keep send order
    in_flight: BTreeMap<(Duration, u64), WireFrame>,
    next_sequence: u64,
    closed: bool,
    stats: LinkStats,
}

type SharedLink = Arc<Mutex<LinkState>>;

fn lock(link: &SharedLink) -> MutexGuard<'_, LinkState> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer and consumer ends of a simulated server connection.
pub struct SimTransport {
    ctx: SimContext,
    session: SessionId,
    link: SharedLink,
}

impl SimTransport {
    /// Creates a transport and the controller that shapes it.
    pub fn pair(ctx: SimContext, profile: LinkProfile, rng: ChaCha8Rng) -> (Self, SimTransportController) {
        let link = Arc::new(Mutex::new(LinkState {
            profile,
            blackout_until: None,
            rng,
            in_flight: BTreeMap::new(),
            next_sequence: 0,
            closed: false,
            stats: LinkStats::default(),
        }));
        let controller = SimTransportController {
            ctx: ctx.clone(),
            link: Arc::clone(&link),
        };
        let transport = Self {
            session: SessionId::from_seed(ctx.seed()),
            ctx,
            link,
        };
        (transport, controller)
    }

    /// Server side: schedules one message for delivery.
    pub fn send(&self, text: impl Into<String>) -> Result<(), EnvError> {
        let now = self.ctx.now();
        let mut link = lock(&self.link);
        if link.closed {
            return Err(EnvError::TransportClosed);
        }

        let sequence = link.next_sequence;
        link.next_sequence += 1;
        link.stats.sent += 1;

        let loss = link.profile.loss.clamp(0.0, 1.0);
        let lost = Bernoulli::new(loss)
            .map(|b| b.sample(&mut link.rng))
            .map_err(|e| EnvError::transport(e.to_string()))?;
        if lost {
            link.stats.dropped += 1;
            return Ok(());
        }

        let jitter_ns = link.profile.jitter.as_nanos() as u64;
        let extra = if jitter_ns > 0 {
            Duration::from_nanos(link.rng.gen_range(0..=jitter_ns))
        } else {
            Duration::ZERO
        };
        let mut deliver_at = now + link.profile.latency + extra;
        if let Some(until) = link.blackout_until {
            deliver_at = deliver_at.max(until);
        }

        let frame = WireFrame::text(text, now.as_millis() as u64, sequence);
        link.in_flight.insert((deliver_at, sequence), frame);
        Ok(())
    }

    /// Server side: no more frames will be sent.
    pub fn close(&self) {
        lock(&self.link).closed = true;
    }

    /// Client side: every frame due at the current virtual time, in
    /// delivery order.
    pub fn poll_due(&self) -> Vec<WireFrame> {
        let now = self.ctx.now();
        let mut link = lock(&self.link);
        let mut due = Vec::new();
        while let Some(entry) = link.in_flight.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((deliver_at, _), frame) = entry.remove_entry();
            record_delivery(&mut link.stats, &frame, deliver_at);
            due.push(frame);
        }
        due
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.link).in_flight.len()
    }

    pub fn stats(&self) -> LinkStats {
        lock(&self.link).stats
    }
}

fn record_delivery(stats: &mut LinkStats, frame: &WireFrame, deliver_at: Duration) {
    stats.delivered += 1;
    let delay = (deliver_at.as_millis() as u64).saturating_sub(frame.sent_ms);
    stats.max_delay_ms = stats.max_delay_ms.max(delay);
}

#[async_trait]
impl SnapshotTransport for SimTransport {
    /// Waits for the next frame in delivery order, moving the virtual clock
    /// forward to its delivery time if nothing else has.
    async fn recv(&self) -> Option<WireFrame> {
        loop {
            {
                let mut link = lock(&self.link);
                if let Some(((deliver_at, _), frame)) = link.in_flight.pop_first() {
                    record_delivery(&mut link.stats, &frame, deliver_at);
                    drop(link);
                    if deliver_at > self.ctx.now() {
                        self.ctx.set_time(deliver_at);
                    }
                    return Some(frame);
                }
                if link.closed {
                    return None;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

/// Fault injection handle for a [`SimTransport`].
pub struct SimTransportController {
    ctx: SimContext,
    link: SharedLink,
}

impl SimTransportController {
    pub fn profile(&self) -> LinkProfile {
        lock(&self.link).profile
    }

    /// True while frames are being held back.
    pub fn in_blackout(&self) -> bool {
        let now = self.ctx.now();
        lock(&self.link).blackout_until.is_some_and(|until| until > now)
    }
}

impl TransportController for SimTransportController {
    fn set_latency(&self, latency: Duration) {
        lock(&self.link).profile.latency = latency;
    }

    fn set_jitter(&self, jitter: Duration) {
        lock(&self.link).profile.jitter = jitter;
    }

    fn set_loss(&self, loss_rate: f64) {
        lock(&self.link).profile.loss = loss_rate.clamp(0.0, 1.0);
    }

    fn blackout(&self, duration: Duration) {
        let until = self.ctx.now() + duration;
        lock(&self.link).blackout_until = Some(until);
    }

    fn heal(&self) {
        let mut link = lock(&self.link);
        link.profile.jitter = Duration::ZERO;
        link.profile.loss = 0.0;
        link.blackout_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(profile: LinkProfile) -> (SimContext, SimTransport, SimTransportController) {
        let ctx = SimContext::new(42);
        let (transport, controller) = SimTransport::pair(ctx.clone(), profile, ctx.rng(9));
        (ctx, transport, controller)
    }

    #[test]
    fn test_latency_delays_delivery() {
        let (ctx, transport, _controller) = pair(LinkProfile::default());
        transport.send("a").unwrap();

        assert!(transport.poll_due().is_empty());
        ctx.advance_time(Duration::from_millis(20));
        let frames = transport.poll_due();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"a");
        assert_eq!(transport.stats().max_delay_ms, 20);
    }

    #[test]
    fn test_blackout_releases_together_in_order() {
        let (ctx, transport, controller) = pair(LinkProfile::clean());
        controller.blackout(Duration::from_millis(100));
        assert!(controller.in_blackout());

        for i in 0..3 {
            transport.send(format!("{i}")).unwrap();
            ctx.advance_time(Duration::from_millis(30));
        }
        assert!(transport.poll_due().is_empty());

        ctx.advance_time(Duration::from_millis(10));
        let frames = transport.poll_due();
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(!controller.in_blackout());
    }

    #[test]
    fn test_total_loss_and_heal() {
        let (ctx, transport, controller) = pair(LinkProfile::clean());
        controller.set_loss(1.0);
        transport.send("x").unwrap();
        ctx.advance_time(Duration::from_millis(1));
        assert!(transport.poll_due().is_empty());
        assert_eq!(transport.stats().dropped, 1);

        controller.heal();
        transport.send("y").unwrap();
        assert_eq!(transport.poll_due().len(), 1);
    }

    #[test]
    fn test_send_after_close_fails() {
        let (_ctx, transport, _controller) = pair(LinkProfile::clean());
        transport.close();
        assert!(matches!(transport.send("late"), Err(EnvError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_recv_advances_clock_and_ends_on_close() {
        let (ctx, transport, _controller) = pair(LinkProfile::default());
        transport.send("first").unwrap();
        transport.close();

        let frame = transport.recv().await.unwrap();
        assert_eq!(frame.sequence, 0);
        assert_eq!(ctx.now(), Duration::from_millis(20));
        assert!(transport.recv().await.is_none());
    }
}
