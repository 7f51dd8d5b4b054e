//! Signal producers: each one turns a market snapshot into a directional
//! opinion with a confidence and a self-assessed coherence.
//!
//! The engine owns publishing and heartbeats, so a producer is a pure
//! `snapshot → message` function with whatever warm-up state it needs. The
//! reference set below keeps the engine runnable end-to-end; production
//! deployments register their own.

use anyhow::Result;

use crate::bus::{Direction, SignalMessage, SignalPayload};
use crate::state::{Config, MarketSnapshot};

pub trait SignalProducer: Send {
    fn name(&self) -> &str;

    /// Signal-quality bucket used by the allocator's tier multiplier
    fn tier(&self) -> u8 {
        2
    }

    fn emit(&mut self, snapshot: &MarketSnapshot) -> Result<SignalMessage>;
}

fn message(
    name: &str,
    snapshot: &MarketSnapshot,
    ready: bool,
    coherence: f64,
    confidence: f64,
    direction: Direction,
    payload: SignalPayload,
) -> SignalMessage {
    SignalMessage {
        producer: name.to_string(),
        ts: snapshot.ts,
        ready,
        coherence: coherence.clamp(0.0, 1.0),
        confidence: confidence.clamp(0.0, 1.0),
        direction,
        payload,
    }
}

// =============================================================================
// Momentum
// =============================================================================

/// Follow momentum once it clears a threshold; confidence grows with the
/// excess.
pub struct MomentumProducer {
    name: String,
    threshold: f64,
    warmup_ticks: u32,
    seen: u32,
}

impl MomentumProducer {
    pub fn new(name: &str, threshold: f64, warmup_ticks: u32) -> Self {
        Self { name: name.to_string(), threshold, warmup_ticks, seen: 0 }
    }
}

impl SignalProducer for MomentumProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> u8 {
        1
    }

    fn emit(&mut self, snapshot: &MarketSnapshot) -> Result<SignalMessage> {
        self.seen = self.seen.saturating_add(1);
        let ready = self.seen > self.warmup_ticks;

        let m = snapshot.momentum;
        let (direction, confidence) = if m > self.threshold {
            (Direction::Buy, (m - self.threshold) / (1.0 - self.threshold).max(1e-9))
        } else if m < -self.threshold {
            (Direction::Sell, (m.abs() - self.threshold) / (1.0 - self.threshold).max(1e-9))
        } else {
            (Direction::Neutral, 0.0)
        };

        // Wide spreads make the read less trustworthy
        let coherence = (1.0 - snapshot.spread * 50.0).clamp(0.2, 1.0);

        Ok(message(
            &self.name,
            snapshot,
            ready,
            coherence,
            confidence,
            direction,
            SignalPayload::Momentum { zscore: m },
        ))
    }
}

// =============================================================================
// Mean reversion
// =============================================================================

/// Fade stretched moves: an extreme momentum reading argues for a snap back.
pub struct MeanReversionProducer {
    name: String,
    extreme: f64,
    warmup_ticks: u32,
    seen: u32,
}

impl MeanReversionProducer {
    pub fn new(name: &str, extreme: f64, warmup_ticks: u32) -> Self {
        Self { name: name.to_string(), extreme, warmup_ticks, seen: 0 }
    }
}

impl SignalProducer for MeanReversionProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> u8 {
        2
    }

    fn emit(&mut self, snapshot: &MarketSnapshot) -> Result<SignalMessage> {
        self.seen = self.seen.saturating_add(1);
        let ready = self.seen > self.warmup_ticks;

        let m = snapshot.momentum;
        let (direction, confidence) = if m > self.extreme {
            // Stretched up → expect reversion down
            (Direction::Sell, ((m - self.extreme) * 2.0).min(0.9))
        } else if m < -self.extreme {
            (Direction::Buy, ((m.abs() - self.extreme) * 2.0).min(0.9))
        } else {
            (Direction::Neutral, 0.0)
        };

        Ok(message(
            &self.name,
            snapshot,
            ready,
            0.6,
            confidence,
            direction,
            SignalPayload::MeanReversion { stretch: m },
        ))
    }
}

// =============================================================================
// Volatility regime
// =============================================================================

/// Trade with momentum only while volatility sits in a workable band; in a
/// storm the producer stands aside with low coherence.
pub struct VolRegimeProducer {
    name: String,
    vol_high: f64,
    warmup_ticks: u32,
    seen: u32,
}

impl VolRegimeProducer {
    pub fn new(name: &str, vol_high: f64, warmup_ticks: u32) -> Self {
        Self { name: name.to_string(), vol_high, warmup_ticks, seen: 0 }
    }
}

impl SignalProducer for VolRegimeProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> u8 {
        3
    }

    fn emit(&mut self, snapshot: &MarketSnapshot) -> Result<SignalMessage> {
        self.seen = self.seen.saturating_add(1);
        let ready = self.seen > self.warmup_ticks;

        let calm = snapshot.volatility < self.vol_high;
        let (direction, confidence, coherence) = if !calm {
            (Direction::Neutral, 0.0, 0.3)
        } else if snapshot.momentum > 0.1 {
            (Direction::Buy, 0.4, 0.8)
        } else if snapshot.momentum < -0.1 {
            (Direction::Sell, 0.4, 0.8)
        } else {
            (Direction::Neutral, 0.0, 0.8)
        };

        Ok(message(
            &self.name,
            snapshot,
            ready,
            coherence,
            confidence,
            direction,
            SignalPayload::VolRegime { ratio: snapshot.volatility },
        ))
    }
}

/// Reference producer set the engine boots with.
pub fn build_default_set(_cfg: &Config) -> Vec<Box<dyn SignalProducer>> {
    vec![
        Box::new(MomentumProducer::new("momentum", 0.2, 2)),
        Box::new(MeanReversionProducer::new("meanrev", 0.6, 2)),
        Box::new(VolRegimeProducer::new("volregime", 0.7, 2)),
    ]
}

// =============================================================================
// Tests
// =============================================================================
