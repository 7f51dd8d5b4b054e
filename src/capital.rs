//! Capital allocator: equity tracking, per-symbol reservations, Kelly-style
//! position sizing, and the harvest/compound split on realized profit.
//!
//! Accounting rule: `available = total − Σ reservations − min_reserve·total`,
//! clamped at zero. Harvested profit leaves the trading pool permanently and
//! never re-enters a sizing calculation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::Config;

/// Snapshot of account-level money tracking, persisted periodically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalState {
    pub total_equity: f64,
    pub available: f64,
    pub reserved: f64,
    pub harvested: f64,
    pub unrealized_pnl: f64,
    pub open_positions: usize,
    pub kelly_fraction: f64,
}

/// Position-size answer: a dollar amount plus the reason it was capped or
/// refused. `amount_usd == 0.0` means no trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeQuote {
    pub amount_usd: f64,
    pub reason: &'static str,
}

/// What a `release` actually moved, for logging and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReleaseOutcome {
    pub principal: f64,
    pub harvested_delta: f64,
    pub returned_to_available: f64,
}

pub struct CapitalAllocator {
    total_equity: f64,
    available: f64,
    reservations: HashMap<String, f64>,
    harvested: f64,
    unrealized_pnl: f64,
    kelly_fraction: f64,
    equity_peak: f64,
    max_drawdown: f64,

    min_reserve_ratio: f64,
    harvest_ratio: f64,
    max_position_pct: f64,
    target_confidence: f64,
    vol_floor: f64,
    min_trade_usd: f64,
    max_trade_usd: f64,
    max_open_positions: usize,
}

impl CapitalAllocator {
    pub fn new(cfg: &Config) -> Self {
        let mut alloc = Self {
            total_equity: cfg.initial_equity,
            available: 0.0,
            reservations: HashMap::new(),
            harvested: 0.0,
            unrealized_pnl: 0.0,
            kelly_fraction: 0.25,
            equity_peak: cfg.initial_equity,
            max_drawdown: 0.0,
            min_reserve_ratio: cfg.min_reserve_ratio,
            harvest_ratio: cfg.harvest_ratio,
            max_position_pct: cfg.max_position_pct,
            target_confidence: cfg.target_confidence,
            vol_floor: cfg.vol_floor,
            min_trade_usd: cfg.min_trade_usd,
            max_trade_usd: cfg.max_trade_usd,
            max_open_positions: cfg.max_open_positions,
        };
        alloc.recompute_available();
        alloc
    }

    fn reserved_total(&self) -> f64 {
        self.reservations.values().sum()
    }

    fn recompute_available(&mut self) {
        let floor_reserve = self.min_reserve_ratio * self.total_equity;
        self.available = (self.total_equity - self.reserved_total() - floor_reserve).max(0.0);
    }

    /// Refresh equity and unrealized P&L, recomputing the available pool.
    pub fn update_equity(&mut self, total: f64, unrealized_pnl: f64) {
        self.total_equity = total;
        self.unrealized_pnl = unrealized_pnl;
        if total > self.equity_peak {
            self.equity_peak = total;
        }
        if self.equity_peak > 0.0 {
            let dd = (self.equity_peak - total) / self.equity_peak;
            if dd > self.max_drawdown {
                self.max_drawdown = dd;
            }
        }
        self.recompute_available();
    }

    /// Kelly fraction is polled from the learning service each cycle.
    pub fn set_kelly_fraction(&mut self, fraction: f64) {
        self.kelly_fraction = fraction.clamp(0.0, 1.0);
    }

    pub fn state(&self) -> CapitalState {
        CapitalState {
            total_equity: self.total_equity,
            available: self.available,
            reserved: self.reserved_total(),
            harvested: self.harvested,
            unrealized_pnl: self.unrealized_pnl,
            open_positions: self.reservations.len(),
            kelly_fraction: self.kelly_fraction,
        }
    }

    pub fn available(&self) -> f64 {
        self.available
    }

    pub fn harvested(&self) -> f64 {
        self.harvested
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn open_positions(&self) -> usize {
        self.reservations.len()
    }

    fn tier_multiplier(tier: u8) -> f64 {
        match tier {
            0 | 1 => 1.0,
            2 => 0.6,
            _ => 0.35,
        }
    }

    /// Kelly-scaled position size in USD.
    ///
    /// base = kelly × max_position_pct of equity, then scaled down by tier,
    /// by confidence shortfall against the target, and by volatility; the
    /// result is clamped to the per-trade band and to half the available
    /// pool.
    pub fn calculate_position_size(&self, confidence: f64, volatility: f64, tier: u8) -> SizeQuote {
        if self.reservations.len() >= self.max_open_positions {
            return SizeQuote { amount_usd: 0.0, reason: "max_positions_reached" };
        }
        if self.available < self.min_trade_usd {
            return SizeQuote { amount_usd: 0.0, reason: "available_below_min_trade" };
        }

        let base = self.kelly_fraction * self.max_position_pct * self.total_equity;
        let tier_mult = Self::tier_multiplier(tier);
        let conf_scale = (confidence / self.target_confidence).min(1.0).max(0.0);
        let vol_scale = (1.0 - volatility).max(self.vol_floor);

        let mut size = base * tier_mult * conf_scale * vol_scale;
        let mut reason = "kelly_scaled";

        if size < self.min_trade_usd {
            size = self.min_trade_usd;
            reason = "raised_to_min_trade";
        }
        if size > self.max_trade_usd {
            size = self.max_trade_usd;
            reason = "capped_at_max_trade";
        }
        let half_available = self.available * 0.5;
        if size > half_available {
            size = half_available;
            reason = "capped_at_half_available";
        }

        SizeQuote { amount_usd: size, reason }
    }

    /// Reserve capital for a symbol. Additive when the symbol already holds a
    /// reservation. Fails without mutation when the amount exceeds available.
    pub fn reserve(&mut self, symbol: &str, amount: f64) -> bool {
        if amount <= 0.0 || amount > self.available {
            return false;
        }
        self.available -= amount;
        *self.reservations.entry(symbol.to_string()).or_insert(0.0) += amount;
        true
    }

    /// Release a symbol's reservation and settle realized profit.
    ///
    /// Profit > 0 is split exactly once: `harvest_ratio` of it is set aside
    /// permanently, the rest compounds back into available together with the
    /// principal. Profit ≤ 0 returns principal plus the loss. Releasing a
    /// symbol with no reservation is a no-op.
    pub fn release(&mut self, symbol: &str, profit: f64) -> ReleaseOutcome {
        let principal = match self.reservations.remove(symbol) {
            Some(p) => p,
            None => return ReleaseOutcome::default(),
        };

        let (harvest_delta, returned) = if profit > 0.0 {
            let harvest = profit * self.harvest_ratio;
            (harvest, principal + profit - harvest)
        } else {
            (0.0, principal + profit)
        };

        self.harvested += harvest_delta;
        self.available = (self.available + returned).max(0.0);

        ReleaseOutcome { principal, harvested_delta: harvest_delta, returned_to_available: returned }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_allocator() -> CapitalAllocator {
        let mut cfg = Config::from_env();
        cfg.initial_equity = 10_000.0;
        cfg.min_reserve_ratio = 0.20;
        cfg.harvest_ratio = 0.10;
        cfg.max_position_pct = 0.25;
        cfg.target_confidence = 0.70;
        cfg.vol_floor = 0.25;
        cfg.min_trade_usd = 10.0;
        cfg.max_trade_usd = 2_500.0;
        cfg.max_open_positions = 5;
        CapitalAllocator::new(&cfg)
    }

    #[test]
    fn test_reserve_and_release_worked_example() {
        // equity 10000, reserve ratio 20%, reserve 500 → available 7500;
        // release with profit 50 at 10% harvest → +5 harvested, available 8045.
        let mut alloc = make_allocator();
        assert!(alloc.reserve("XYZ", 500.0));
        alloc.update_equity(10_000.0, 0.0);
        assert!((alloc.available() - 7_500.0).abs() < 1e-9);

        let out = alloc.release("XYZ", 50.0);
        assert!((out.harvested_delta - 5.0).abs() < 1e-9);
        assert!((out.returned_to_available - 545.0).abs() < 1e-9);
        assert!((alloc.available() - 8_045.0).abs() < 1e-9);
        assert!((alloc.harvested() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_reserve_fails_beyond_available_without_mutation() {
        let mut alloc = make_allocator();
        let before = alloc.state();
        assert!(!alloc.reserve("XYZ", before.available + 1.0));
        let after = alloc.state();
        assert_eq!(before, after);
    }

    #[test]
    fn test_reserve_is_additive_per_symbol() {
        let mut alloc = make_allocator();
        assert!(alloc.reserve("XYZ", 300.0));
        assert!(alloc.reserve("XYZ", 200.0));
        assert_eq!(alloc.open_positions(), 1);
        let out = alloc.release("XYZ", 0.0);
        assert!((out.principal - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_release_idempotent() {
        let mut alloc = make_allocator();
        assert!(alloc.reserve("XYZ", 500.0));
        alloc.release("XYZ", 50.0);
        let available = alloc.available();
        let harvested = alloc.harvested();

        // Second release: nothing reserved, nothing moves
        let out = alloc.release("XYZ", 50.0);
        assert_eq!(out, ReleaseOutcome::default());
        assert_eq!(alloc.available(), available);
        assert_eq!(alloc.harvested(), harvested);
    }

    #[test]
    fn test_loss_returns_principal_plus_loss() {
        let mut alloc = make_allocator();
        let before = alloc.available();
        assert!(alloc.reserve("XYZ", 500.0));
        let out = alloc.release("XYZ", -120.0);
        assert_eq!(out.harvested_delta, 0.0);
        assert!((out.returned_to_available - 380.0).abs() < 1e-9);
        assert!((alloc.available() - (before - 120.0)).abs() < 1e-9);
    }

    /// Capital conservation: available + reserved + harvested after a
    /// reserve/release pair equals the starting pool plus net profit, with
    /// the harvest split applied exactly once.
    #[test]
    fn test_capital_conservation_over_sequence() {
        let mut alloc = make_allocator();
        let pool_before = alloc.available();
        let trades: &[(&str, f64, f64)] =
            &[("AAA", 400.0, 30.0), ("BBB", 250.0, -75.0), ("CCC", 600.0, 120.0), ("AAA", 300.0, 0.0)];

        let mut net_profit = 0.0;
        for (symbol, amount, profit) in trades {
            assert!(alloc.reserve(symbol, *amount));
            alloc.release(symbol, *profit);
            net_profit += profit;
        }

        let pool_after = alloc.available() + alloc.harvested();
        assert!(
            (pool_after - (pool_before + net_profit)).abs() < 1e-9,
            "conservation violated: {} vs {}",
            pool_after,
            pool_before + net_profit
        );
    }

    #[test]
    fn test_harvested_is_monotonic() {
        let mut alloc = make_allocator();
        let mut last = 0.0;
        for (i, profit) in [50.0, -80.0, 10.0, 0.0, 200.0].iter().enumerate() {
            let sym = format!("S{}", i);
            assert!(alloc.reserve(&sym, 100.0));
            alloc.release(&sym, *profit);
            assert!(alloc.harvested() >= last);
            last = alloc.harvested();
        }
        // Only the positive profits harvested: (50 + 10 + 200) * 0.10
        assert!((last - 26.0).abs() < 1e-9);
    }

    #[test]
    fn test_size_zero_when_position_count_maxed() {
        let mut alloc = make_allocator();
        for i in 0..5 {
            assert!(alloc.reserve(&format!("S{}", i), 100.0));
        }
        let quote = alloc.calculate_position_size(0.9, 0.1, 1);
        assert_eq!(quote.amount_usd, 0.0);
        assert_eq!(quote.reason, "max_positions_reached");
    }

    #[test]
    fn test_size_zero_when_available_below_min_trade() {
        let mut alloc = make_allocator();
        alloc.update_equity(10.0, 0.0); // available collapses to ~8
        alloc.min_trade_usd = 50.0;
        let quote = alloc.calculate_position_size(0.9, 0.1, 1);
        assert_eq!(quote.amount_usd, 0.0);
        assert_eq!(quote.reason, "available_below_min_trade");
    }

    #[test]
    fn test_higher_tier_means_smaller_size() {
        let alloc = make_allocator();
        let t1 = alloc.calculate_position_size(0.9, 0.1, 1).amount_usd;
        let t2 = alloc.calculate_position_size(0.9, 0.1, 2).amount_usd;
        let t3 = alloc.calculate_position_size(0.9, 0.1, 3).amount_usd;
        assert!(t1 > t2 && t2 > t3, "t1={} t2={} t3={}", t1, t2, t3);
    }

    #[test]
    fn test_confidence_scales_size_up_to_target() {
        let alloc = make_allocator();
        let low = alloc.calculate_position_size(0.35, 0.1, 1).amount_usd;
        let at_target = alloc.calculate_position_size(0.70, 0.1, 1).amount_usd;
        let above = alloc.calculate_position_size(0.95, 0.1, 1).amount_usd;
        assert!(low < at_target);
        // Above target confidence gains nothing extra
        assert!((above - at_target).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_floor_bounds_the_discount() {
        let alloc = make_allocator();
        let calm = alloc.calculate_position_size(0.9, 0.0, 1).amount_usd;
        let wild = alloc.calculate_position_size(0.9, 0.95, 1).amount_usd;
        // 1-0.95 = 0.05 is floored at 0.25
        assert!((wild - calm * 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_size_never_exceeds_half_available() {
        let mut alloc = make_allocator();
        alloc.set_kelly_fraction(1.0);
        alloc.max_position_pct = 1.0;
        alloc.max_trade_usd = 1_000_000.0;
        let quote = alloc.calculate_position_size(1.0, 0.0, 1);
        assert!(quote.amount_usd <= alloc.available() * 0.5 + 1e-9);
        assert_eq!(quote.reason, "capped_at_half_available");
    }

    #[test]
    fn test_drawdown_tracked_from_peak() {
        let mut alloc = make_allocator();
        alloc.update_equity(12_000.0, 0.0);
        alloc.update_equity(9_000.0, 0.0);
        assert!((alloc.max_drawdown() - 0.25).abs() < 1e-9);
        // Recovery does not erase the high-water mark
        alloc.update_equity(12_000.0, 0.0);
        assert!((alloc.max_drawdown() - 0.25).abs() < 1e-9);
    }
}
