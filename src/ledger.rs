//! Position ledger: the authoritative in-memory record of open positions and
//! their protective levels.
//!
//! Lifecycle per symbol: none → open → (trailing) → closed. The static
//! take-profit and stop-loss always sit on the correct side of entry for the
//! position's side; the trailing stop is separate state that only ever
//! ratchets in the favorable direction once activated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::Config;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

/// Entry-time context frozen into the record for post-trade analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub confidence: f64,
    pub coherence: f64,
    pub tier: u8,
    pub heat_at_entry: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    /// Best price seen since activation
    pub peak_price: f64,
    /// Ratcheted stop; moves toward the peak, never away
    pub stop_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub venue: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub notional_usd: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub trailing: Option<TrailingState>,
    pub opened_ts: u64,
    pub unrealized_pnl: f64,
    pub entry_risk: RiskSnapshot,
}

impl PositionRecord {
    /// LONG: TP > entry > SL; SHORT: TP < entry < SL.
    pub fn levels_valid(&self) -> bool {
        match self.side {
            Side::Long => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Side::Short => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TrailingStop => "trailing_stop",
            CloseReason::Manual => "manual",
        }
    }
}

/// Terminal record emitted on close; the live entry is gone after this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub record: PositionRecord,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub reason: CloseReason,
    pub closed_ts: u64,
}

/// What a price tick did to a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub unrealized_pnl: f64,
    pub trailing_activated: bool,
    pub trigger: Option<CloseReason>,
}

// =============================================================================
// Ledger
// =============================================================================

pub struct PositionLedger {
    live: HashMap<String, PositionRecord>,
    max_positions: usize,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    trail_activation_pct: f64,
    trail_distance_pct: f64,
}

impl PositionLedger {
    pub fn new(cfg: &Config) -> Self {
        Self {
            live: HashMap::new(),
            max_positions: cfg.max_open_positions,
            take_profit_pct: cfg.take_profit_pct,
            stop_loss_pct: cfg.stop_loss_pct,
            trail_activation_pct: cfg.trailing_activation_pct,
            trail_distance_pct: cfg.trailing_distance_pct,
        }
    }

    pub fn open_count(&self) -> usize {
        self.live.len()
    }

    pub fn get(&self, symbol: &str) -> Option<&PositionRecord> {
        self.live.get(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut syms: Vec<String> = self.live.keys().cloned().collect();
        syms.sort();
        syms
    }

    pub fn total_unrealized(&self) -> f64 {
        self.live.values().map(|p| p.unrealized_pnl).sum()
    }

    /// Open a position. Refused when the book is full or the symbol already
    /// has a live position.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &mut self,
        symbol: &str,
        venue: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        entry_risk: RiskSnapshot,
        now_ts: u64,
    ) -> Result<&PositionRecord, &'static str> {
        if self.live.len() >= self.max_positions {
            return Err("max_positions_reached");
        }
        if self.live.contains_key(symbol) {
            return Err("position_already_open");
        }
        if entry_price <= 0.0 || quantity <= 0.0 {
            return Err("invalid_entry");
        }

        let (take_profit, stop_loss) = match side {
            Side::Long => (
                entry_price * (1.0 + self.take_profit_pct),
                entry_price * (1.0 - self.stop_loss_pct),
            ),
            Side::Short => (
                entry_price * (1.0 - self.take_profit_pct),
                entry_price * (1.0 + self.stop_loss_pct),
            ),
        };

        let record = PositionRecord {
            symbol: symbol.to_string(),
            venue: venue.to_string(),
            side,
            entry_price,
            quantity,
            notional_usd: entry_price * quantity,
            take_profit,
            stop_loss,
            trailing: None,
            opened_ts: now_ts,
            unrealized_pnl: 0.0,
            entry_risk,
        };
        debug_assert!(record.levels_valid());
        Ok(self.live.entry(symbol.to_string()).or_insert(record))
    }

    /// Restore a persisted open position at cold start. Rows with protective
    /// levels on the wrong side are dropped rather than trusted.
    pub fn rehydrate(&mut self, record: PositionRecord) -> Result<(), &'static str> {
        if self.live.len() >= self.max_positions {
            return Err("max_positions_reached");
        }
        if self.live.contains_key(&record.symbol) {
            return Err("position_already_open");
        }
        if !record.levels_valid() {
            return Err("invalid_protective_levels");
        }
        self.live.insert(record.symbol.clone(), record);
        Ok(())
    }

    /// Mark a position to the latest price: recompute unrealized P&L,
    /// activate/ratchet the trailing stop, and report any close trigger.
    /// The caller decides whether to act on the trigger.
    pub fn update_price(&mut self, symbol: &str, price: f64) -> Option<TickOutcome> {
        let pos = self.live.get_mut(symbol)?;

        pos.unrealized_pnl = (price - pos.entry_price) * pos.side.sign() * pos.quantity;
        let pnl_pct = (price - pos.entry_price) / pos.entry_price * pos.side.sign();

        let mut activated = false;
        if pos.trailing.is_none() && pnl_pct >= self.trail_activation_pct {
            let stop = match pos.side {
                Side::Long => price * (1.0 - self.trail_distance_pct),
                Side::Short => price * (1.0 + self.trail_distance_pct),
            };
            pos.trailing = Some(TrailingState { peak_price: price, stop_price: stop });
            activated = true;
        } else if let Some(trail) = pos.trailing.as_mut() {
            // Ratchet: stop follows the peak, never retreats
            match pos.side {
                Side::Long => {
                    if price > trail.peak_price {
                        trail.peak_price = price;
                        let candidate = price * (1.0 - self.trail_distance_pct);
                        if candidate > trail.stop_price {
                            trail.stop_price = candidate;
                        }
                    }
                }
                Side::Short => {
                    if price < trail.peak_price {
                        trail.peak_price = price;
                        let candidate = price * (1.0 + self.trail_distance_pct);
                        if candidate < trail.stop_price {
                            trail.stop_price = candidate;
                        }
                    }
                }
            }
        }

        let trigger = Self::close_trigger(pos, price);
        Some(TickOutcome { unrealized_pnl: pos.unrealized_pnl, trailing_activated: activated, trigger })
    }

    fn close_trigger(pos: &PositionRecord, price: f64) -> Option<CloseReason> {
        match pos.side {
            Side::Long => {
                if price >= pos.take_profit {
                    return Some(CloseReason::TakeProfit);
                }
                if price <= pos.stop_loss {
                    return Some(CloseReason::StopLoss);
                }
                if let Some(trail) = &pos.trailing {
                    if price <= trail.stop_price {
                        return Some(CloseReason::TrailingStop);
                    }
                }
            }
            Side::Short => {
                if price <= pos.take_profit {
                    return Some(CloseReason::TakeProfit);
                }
                if price >= pos.stop_loss {
                    return Some(CloseReason::StopLoss);
                }
                if let Some(trail) = &pos.trailing {
                    if price >= trail.stop_price {
                        return Some(CloseReason::TrailingStop);
                    }
                }
            }
        }
        None
    }

    /// Close and remove a live position, producing the terminal record.
    pub fn close_position(
        &mut self,
        symbol: &str,
        exit_price: f64,
        reason: CloseReason,
        now_ts: u64,
    ) -> Option<ClosedPosition> {
        let record = self.live.remove(symbol)?;
        let realized_pnl = (exit_price - record.entry_price) * record.side.sign() * record.quantity;
        Some(ClosedPosition { record, exit_price, realized_pnl, reason, closed_ts: now_ts })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ledger() -> PositionLedger {
        let mut cfg = Config::from_env();
        cfg.max_open_positions = 3;
        cfg.take_profit_pct = 0.03;
        cfg.stop_loss_pct = 0.015;
        cfg.trailing_activation_pct = 0.02;
        cfg.trailing_distance_pct = 0.01;
        PositionLedger::new(&cfg)
    }

    fn risk() -> RiskSnapshot {
        RiskSnapshot { confidence: 0.8, coherence: 0.7, tier: 1, heat_at_entry: 0.1 }
    }

    fn assert_levels(pos: &PositionRecord) {
        assert!(pos.levels_valid(), "levels wrong for {:?}: sl={} entry={} tp={}",
            pos.side, pos.stop_loss, pos.entry_price, pos.take_profit);
    }

    #[test]
    fn test_open_long_levels() {
        let mut ledger = make_ledger();
        let pos = ledger
            .open_position("BTCUSDT", "binance", Side::Long, 100.0, 1.0, risk(), 1000)
            .unwrap();
        assert!((pos.take_profit - 103.0).abs() < 1e-9);
        assert!((pos.stop_loss - 98.5).abs() < 1e-9);
        assert_levels(pos);
    }

    #[test]
    fn test_open_short_levels() {
        let mut ledger = make_ledger();
        let pos = ledger
            .open_position("BTCUSDT", "binance", Side::Short, 100.0, 1.0, risk(), 1000)
            .unwrap();
        assert!((pos.take_profit - 97.0).abs() < 1e-9);
        assert!((pos.stop_loss - 101.5).abs() < 1e-9);
        assert_levels(pos);
    }

    #[test]
    fn test_one_live_position_per_symbol() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Long, 100.0, 1.0, risk(), 1000).unwrap();
        let err = ledger
            .open_position("BTCUSDT", "kraken", Side::Short, 101.0, 1.0, risk(), 1001)
            .unwrap_err();
        assert_eq!(err, "position_already_open");
    }

    #[test]
    fn test_max_positions_enforced() {
        let mut ledger = make_ledger();
        for (i, sym) in ["A", "B", "C"].iter().enumerate() {
            ledger.open_position(sym, "binance", Side::Long, 100.0, 1.0, risk(), 1000 + i as u64).unwrap();
        }
        let err = ledger
            .open_position("D", "binance", Side::Long, 100.0, 1.0, risk(), 2000)
            .unwrap_err();
        assert_eq!(err, "max_positions_reached");
    }

    #[test]
    fn test_unrealized_pnl_both_sides() {
        let mut ledger = make_ledger();
        ledger.open_position("LONGY", "binance", Side::Long, 100.0, 2.0, risk(), 1000).unwrap();
        ledger.open_position("SHRTY", "binance", Side::Short, 100.0, 2.0, risk(), 1000).unwrap();

        let long = ledger.update_price("LONGY", 101.0).unwrap();
        assert!((long.unrealized_pnl - 2.0).abs() < 1e-9);

        let short = ledger.update_price("SHRTY", 101.0).unwrap();
        assert!((short.unrealized_pnl + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_trigger() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Long, 100.0, 1.0, risk(), 1000).unwrap();
        let out = ledger.update_price("BTCUSDT", 103.0).unwrap();
        assert_eq!(out.trigger, Some(CloseReason::TakeProfit));
    }

    #[test]
    fn test_stop_loss_trigger_short() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Short, 100.0, 1.0, risk(), 1000).unwrap();
        let out = ledger.update_price("BTCUSDT", 101.5).unwrap();
        assert_eq!(out.trigger, Some(CloseReason::StopLoss));
    }

    #[test]
    fn test_trailing_activates_and_ratchets() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Long, 100.0, 1.0, risk(), 1000).unwrap();

        // +1%: below activation
        let out = ledger.update_price("BTCUSDT", 101.0).unwrap();
        assert!(!out.trailing_activated);
        assert!(ledger.get("BTCUSDT").unwrap().trailing.is_none());

        // +2%: activates, stop at 102 * 0.99
        let out = ledger.update_price("BTCUSDT", 102.0).unwrap();
        assert!(out.trailing_activated);
        let trail = ledger.get("BTCUSDT").unwrap().trailing.unwrap();
        assert!((trail.stop_price - 100.98).abs() < 1e-9);

        // New peak ratchets the stop up
        ledger.update_price("BTCUSDT", 102.8).unwrap();
        let trail = ledger.get("BTCUSDT").unwrap().trailing.unwrap();
        assert!((trail.stop_price - 101.772).abs() < 1e-9);

        // Pullback: stop holds, never retreats
        ledger.update_price("BTCUSDT", 102.0).unwrap();
        let after = ledger.get("BTCUSDT").unwrap().trailing.unwrap();
        assert!((after.stop_price - 101.772).abs() < 1e-9);

        // Static protective levels untouched by trailing
        assert_levels(ledger.get("BTCUSDT").unwrap());
    }

    #[test]
    fn test_trailing_stop_triggers_close() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Long, 100.0, 1.0, risk(), 1000).unwrap();
        ledger.update_price("BTCUSDT", 102.0).unwrap(); // activate, stop 100.98
        let out = ledger.update_price("BTCUSDT", 100.9).unwrap();
        assert_eq!(out.trigger, Some(CloseReason::TrailingStop));
    }

    #[test]
    fn test_trailing_short_ratchets_down() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Short, 100.0, 1.0, risk(), 1000).unwrap();
        ledger.update_price("BTCUSDT", 98.0).unwrap(); // +2% for a short
        let trail = ledger.get("BTCUSDT").unwrap().trailing.unwrap();
        assert!((trail.stop_price - 98.98).abs() < 1e-9);

        ledger.update_price("BTCUSDT", 97.0).unwrap();
        let trail = ledger.get("BTCUSDT").unwrap().trailing.unwrap();
        assert!((trail.stop_price - 97.97).abs() < 1e-9);

        // Bounce up does not loosen the stop
        ledger.update_price("BTCUSDT", 97.9).unwrap();
        let after = ledger.get("BTCUSDT").unwrap().trailing.unwrap();
        assert!((after.stop_price - 97.97).abs() < 1e-9);
    }

    #[test]
    fn test_close_removes_and_computes_realized() {
        let mut ledger = make_ledger();
        ledger.open_position("BTCUSDT", "binance", Side::Long, 100.0, 2.0, risk(), 1000).unwrap();
        let closed = ledger
            .close_position("BTCUSDT", 102.5, CloseReason::Manual, 2000)
            .unwrap();
        assert!((closed.realized_pnl - 5.0).abs() < 1e-9);
        assert_eq!(closed.reason, CloseReason::Manual);
        assert_eq!(ledger.open_count(), 0);
        // Second close of the same symbol: nothing there
        assert!(ledger.close_position("BTCUSDT", 102.5, CloseReason::Manual, 2001).is_none());
    }

    #[test]
    fn test_rehydrate_rejects_invalid_levels() {
        let mut ledger = make_ledger();
        let mut record = PositionRecord {
            symbol: "BTCUSDT".to_string(),
            venue: "binance".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            quantity: 1.0,
            notional_usd: 100.0,
            take_profit: 103.0,
            stop_loss: 98.5,
            trailing: None,
            opened_ts: 500,
            unrealized_pnl: 0.0,
            entry_risk: risk(),
        };
        assert!(ledger.rehydrate(record.clone()).is_ok());
        assert_eq!(ledger.open_count(), 1);

        record.symbol = "ETHUSDT".to_string();
        record.stop_loss = 105.0; // wrong side for a long
        assert_eq!(ledger.rehydrate(record).unwrap_err(), "invalid_protective_levels");
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_update_unknown_symbol_is_none() {
        let mut ledger = make_ledger();
        assert!(ledger.update_price("NOPE", 100.0).is_none());
    }
}
