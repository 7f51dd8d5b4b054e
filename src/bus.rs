//! In-memory signal bus: latest-message store per producer plus the
//! weighted consensus read, with a liveness registry gating which producers
//! count at all.
//!
//! Publishing overwrites; nothing is ever deleted, only superseded. The
//! consensus is recomputed on every read from whatever is currently fresh
//! and live, so a stalled producer ages out of the vote instead of pinning
//! it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Neutral,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Neutral => "NEUTRAL",
        }
    }
}

/// Typed payload per producer kind. Producers that carry nothing beyond
/// direction/confidence use `None`; one-off numeric diagnostics use `Scalar`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalPayload {
    Momentum { zscore: f64 },
    MeanReversion { stretch: f64 },
    VolRegime { ratio: f64 },
    Scalar { value: f64 },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub producer: String,
    pub ts: u64,
    /// Producer self-declared warm-up state; unready messages are stored but
    /// never vote.
    pub ready: bool,
    /// Self-assessed reliability in [0, 1], independent of direction
    pub coherence: f64,
    /// Strength of signal in [0, 1]; the consensus weight
    pub confidence: f64,
    pub direction: Direction,
    pub payload: SignalPayload,
}

impl SignalMessage {
    pub fn is_fresh(&self, now_ts: u64, window_secs: u64) -> bool {
        self.ts != 0 && now_ts.saturating_sub(self.ts) <= window_secs
    }
}

// =============================================================================
// Liveness registry
// =============================================================================

const HEALTH_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
struct ProducerHealth {
    last_heartbeat: u64,
    /// EWMA of on-time heartbeats in [0, 1]
    health: f64,
}

/// Tracks which producers are alive. A producer that stops heartbeating is
/// excluded from both the readiness denominator and the consensus weighting,
/// so one stalled producer cannot starve consensus forever.
pub struct LivenessRegistry {
    producers: HashMap<String, ProducerHealth>,
    timeout_secs: u64,
}

impl LivenessRegistry {
    pub fn new(timeout_secs: u64) -> Self {
        Self { producers: HashMap::new(), timeout_secs }
    }

    pub fn register(&mut self, name: &str, now_ts: u64) {
        self.producers
            .entry(name.to_string())
            .or_insert(ProducerHealth { last_heartbeat: now_ts, health: 1.0 });
    }

    pub fn heartbeat(&mut self, name: &str, now_ts: u64) {
        let timeout = self.timeout_secs;
        let entry = self
            .producers
            .entry(name.to_string())
            .or_insert(ProducerHealth { last_heartbeat: now_ts, health: 1.0 });
        let on_time = now_ts.saturating_sub(entry.last_heartbeat) <= timeout;
        let sample = if on_time { 1.0 } else { 0.0 };
        entry.health = HEALTH_ALPHA * sample + (1.0 - HEALTH_ALPHA) * entry.health;
        entry.last_heartbeat = now_ts;
    }

    pub fn is_active(&self, name: &str, now_ts: u64) -> bool {
        self.producers
            .get(name)
            .map(|p| now_ts.saturating_sub(p.last_heartbeat) <= self.timeout_secs)
            .unwrap_or(false)
    }

    pub fn health(&self, name: &str) -> f64 {
        self.producers.get(name).map(|p| p.health).unwrap_or(0.0)
    }

    pub fn registered_count(&self) -> usize {
        self.producers.len()
    }

    /// Registered producers still within the heartbeat timeout
    pub fn active_count(&self, now_ts: u64) -> usize {
        self.producers
            .values()
            .filter(|p| now_ts.saturating_sub(p.last_heartbeat) <= self.timeout_secs)
            .count()
    }
}

// =============================================================================
// Bus + consensus
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub direction: Direction,
    /// Normalized score in [-1, 1]
    pub score: f64,
    /// Weighted mean confidence of the voting producers
    pub confidence: f64,
    /// Weighted mean coherence of the voting producers
    pub coherence: f64,
    pub ready: bool,
    pub fresh_producers: usize,
    pub active_producers: usize,
}

impl Consensus {
    fn empty() -> Self {
        Self {
            direction: Direction::Neutral,
            score: 0.0,
            confidence: 0.0,
            coherence: 0.0,
            ready: false,
            fresh_producers: 0,
            active_producers: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusSnapshot {
    pub messages: Vec<SignalMessage>,
    pub consensus: Consensus,
}

pub struct SignalBus {
    messages: HashMap<String, SignalMessage>,
    /// Static per-producer weight; defaults to 1.0 when unset
    weights: HashMap<String, f64>,
    freshness_secs: u64,
    consensus_threshold: f64,
    readiness_ratio: f64,
}

impl SignalBus {
    pub fn new(freshness_secs: u64, consensus_threshold: f64, readiness_ratio: f64) -> Self {
        Self {
            messages: HashMap::new(),
            weights: HashMap::new(),
            freshness_secs,
            consensus_threshold,
            readiness_ratio,
        }
    }

    pub fn set_weight(&mut self, producer: &str, weight: f64) {
        self.weights.insert(producer.to_string(), weight.max(0.0));
    }

    /// Store or overwrite the latest message for this producer.
    pub fn publish(&mut self, msg: SignalMessage) {
        self.messages.insert(msg.producer.clone(), msg);
    }

    pub fn latest(&self, producer: &str) -> Option<&SignalMessage> {
        self.messages.get(producer)
    }

    pub fn snapshot(&self, liveness: &LivenessRegistry, now_ts: u64) -> BusSnapshot {
        let mut messages: Vec<SignalMessage> = self.messages.values().cloned().collect();
        messages.sort_by(|a, b| a.producer.cmp(&b.producer));
        BusSnapshot { messages, consensus: self.check_consensus(liveness, now_ts) }
    }

    /// Weighted consensus over fresh, live, ready producers.
    ///
    /// Each voter contributes `direction_sign * confidence * weight`; the sum
    /// is normalized by the total effective weight so the score stays in
    /// [-1, 1] and adding an agreeing voter can never lower it.
    pub fn check_consensus(&self, liveness: &LivenessRegistry, now_ts: u64) -> Consensus {
        let mut weighted_sum = 0.0;
        let mut total_effective = 0.0;
        let mut conf_sum = 0.0;
        let mut coh_sum = 0.0;
        let mut static_sum = 0.0;
        let mut fresh = 0usize;

        for msg in self.messages.values() {
            if !msg.ready
                || !msg.is_fresh(now_ts, self.freshness_secs)
                || !liveness.is_active(&msg.producer, now_ts)
            {
                continue;
            }
            let weight = *self.weights.get(&msg.producer).unwrap_or(&1.0);
            let effective = msg.confidence.clamp(0.0, 1.0) * weight;
            weighted_sum += msg.direction.sign() * effective;
            total_effective += effective;
            conf_sum += msg.confidence * weight;
            coh_sum += msg.coherence * weight;
            static_sum += weight;
            fresh += 1;
        }

        let active = liveness.active_count(now_ts);
        if active == 0 || fresh == 0 {
            return Consensus { active_producers: active, ..Consensus::empty() };
        }

        let score = if total_effective > 0.0 { weighted_sum / total_effective } else { 0.0 };
        let direction = if score > self.consensus_threshold {
            Direction::Buy
        } else if score < -self.consensus_threshold {
            Direction::Sell
        } else {
            Direction::Neutral
        };

        Consensus {
            direction,
            score,
            confidence: if static_sum > 0.0 { conf_sum / static_sum } else { 0.0 },
            coherence: if static_sum > 0.0 { coh_sum / static_sum } else { 0.0 },
            ready: fresh as f64 / active as f64 >= self.readiness_ratio,
            fresh_producers: fresh,
            active_producers: active,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
