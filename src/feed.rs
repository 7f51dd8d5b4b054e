//! Market-data feed seam.
//!
//! The engine pulls exactly one snapshot per cycle through this trait; a
//! failed pull degrades that cycle to no-trade instead of crashing. The
//! replay feed drives deterministic tests, the sim feed gives paper runs a
//! plausible random walk.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;

use crate::state::MarketSnapshot;

#[async_trait]
pub trait MarketDataFeed: Send {
    async fn fetch(&mut self, symbol: &str, now_ts: u64) -> Result<MarketSnapshot>;
}

// =============================================================================
// Replay feed (tests, backtests)
// =============================================================================

/// Hands out pre-loaded snapshots in order; errors once exhausted.
pub struct ReplayFeed {
    snapshots: VecDeque<MarketSnapshot>,
}

impl ReplayFeed {
    pub fn new(snapshots: Vec<MarketSnapshot>) -> Self {
        Self { snapshots: snapshots.into() }
    }

    pub fn remaining(&self) -> usize {
        self.snapshots.len()
    }
}

#[async_trait]
impl MarketDataFeed for ReplayFeed {
    async fn fetch(&mut self, _symbol: &str, _now_ts: u64) -> Result<MarketSnapshot> {
        match self.snapshots.pop_front() {
            Some(snap) => Ok(snap),
            None => bail!("replay feed exhausted"),
        }
    }
}

// =============================================================================
// Sim feed (paper runs)
// =============================================================================

/// Random-walk prices with slowly mean-reverting momentum and volatility.
pub struct SimFeed {
    price: f64,
    momentum: f64,
    volatility: f64,
}

impl SimFeed {
    pub fn new(start_price: f64) -> Self {
        Self { price: start_price, momentum: 0.0, volatility: 0.2 }
    }
}

#[async_trait]
impl MarketDataFeed for SimFeed {
    async fn fetch(&mut self, _symbol: &str, now_ts: u64) -> Result<MarketSnapshot> {
        let mut rng = rand::thread_rng();
        let shock: f64 = rng.gen_range(-1.0..1.0);
        self.momentum = (self.momentum * 0.8 + shock * 0.3).clamp(-1.0, 1.0);
        self.volatility = (self.volatility * 0.9 + shock.abs() * 0.05).clamp(0.05, 1.0);
        self.price *= 1.0 + self.momentum * 0.002 + shock * self.volatility * 0.001;
        self.price = self.price.max(0.01);

        Ok(MarketSnapshot {
            price: self.price,
            volume: rng.gen_range(50.0..500.0),
            volatility: self.volatility,
            momentum: self.momentum,
            spread: 0.0005 + self.volatility * 0.001,
            ts: now_ts,
        })
    }
}
