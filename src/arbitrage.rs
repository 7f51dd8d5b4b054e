//! Cross-venue arbitrage scanner.
//!
//! Keeps a short-lived price cache per (symbol, venue) and evaluates every
//! venue pair in both directions. The spread is measured against the cheaper
//! leg and fees shrink the magnitude toward zero, so scanning A/B and B/A
//! produces exact mirror numbers. Executed opportunities land in a bounded
//! ring: the scanner's only history.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

// =============================================================================
// Price cache
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub venue: String,
    pub price: f64,
    pub ts: u64,
}

impl PricePoint {
    pub fn is_stale(&self, now_ts: u64, ttl_secs: u64) -> bool {
        self.ts == 0 || now_ts.saturating_sub(self.ts) > ttl_secs
    }
}

// =============================================================================
// Opportunities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub symbol: String,
    pub buy_venue: String,
    pub buy_price: f64,
    pub sell_venue: String,
    pub sell_price: f64,
    pub gross_spread_pct: f64,
    pub net_profit_pct: f64,
    pub viable: bool,
}

/// One executed opportunity retained for statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedArb {
    pub opportunity: ArbitrageOpportunity,
    pub profit_usd: f64,
    pub executed_ts: u64,
}

/// Spread against the cheaper leg: both directions are exact mirrors.
pub fn gross_spread_pct(buy_price: f64, sell_price: f64) -> f64 {
    let base = buy_price.min(sell_price);
    if base <= 0.0 {
        return 0.0;
    }
    (sell_price - buy_price) / base
}

/// Fees reduce the spread magnitude toward zero, preserving mirror symmetry.
pub fn net_profit_pct(buy_price: f64, sell_price: f64, buy_fee: f64, sell_fee: f64) -> f64 {
    let gross = gross_spread_pct(buy_price, sell_price);
    gross - gross.signum() * (buy_fee + sell_fee)
}

// =============================================================================
// Scanner
// =============================================================================

pub struct ArbScanner {
    prices: HashMap<(String, String), PricePoint>,
    /// Per-venue taker fee; `default_fee_pct` when a venue is unlisted
    fees: HashMap<String, f64>,
    default_fee_pct: f64,
    ttl_secs: u64,
    min_spread_pct: f64,
    min_net_pct: f64,
    best: Option<ArbitrageOpportunity>,
    history: VecDeque<ExecutedArb>,
    history_capacity: usize,
}

impl ArbScanner {
    pub fn new(
        ttl_secs: u64,
        min_spread_pct: f64,
        min_net_pct: f64,
        default_fee_pct: f64,
        history_capacity: usize,
    ) -> Self {
        Self {
            prices: HashMap::new(),
            fees: HashMap::new(),
            default_fee_pct,
            ttl_secs,
            min_spread_pct,
            min_net_pct,
            best: None,
            history: VecDeque::with_capacity(history_capacity.max(1)),
            history_capacity: history_capacity.max(1),
        }
    }

    pub fn set_venue_fee(&mut self, venue: &str, fee_pct: f64) {
        self.fees.insert(venue.to_string(), fee_pct.max(0.0));
    }

    fn fee_for(&self, venue: &str) -> f64 {
        *self.fees.get(venue).unwrap_or(&self.default_fee_pct)
    }

    /// Overwrite the last known price for a (symbol, venue).
    pub fn update_price(&mut self, symbol: &str, venue: &str, price: f64, now_ts: u64) {
        self.prices.insert(
            (symbol.to_string(), venue.to_string()),
            PricePoint { symbol: symbol.to_string(), venue: venue.to_string(), price, ts: now_ts },
        );
    }

    pub fn price(&self, symbol: &str, venue: &str) -> Option<&PricePoint> {
        self.prices.get(&(symbol.to_string(), venue.to_string()))
    }

    fn fresh_points_for(&self, symbol: &str, now_ts: u64) -> Vec<&PricePoint> {
        let mut points: Vec<&PricePoint> = self
            .prices
            .values()
            .filter(|p| p.symbol == symbol && !p.is_stale(now_ts, self.ttl_secs))
            .collect();
        points.sort_by(|a, b| a.venue.cmp(&b.venue));
        points
    }

    /// Scan every symbol's fresh venue pairs in both directions. Candidates
    /// need the minimum gross spread; viability additionally needs the
    /// fee-adjusted net above its floor. Results sorted by net, best first.
    pub fn scan_direct(&mut self, symbols: &[String], now_ts: u64) -> Vec<ArbitrageOpportunity> {
        let mut found = Vec::new();

        for symbol in symbols {
            let points = self.fresh_points_for(symbol, now_ts);
            for i in 0..points.len() {
                for j in (i + 1)..points.len() {
                    for (buy, sell) in [(points[i], points[j]), (points[j], points[i])] {
                        let gross = gross_spread_pct(buy.price, sell.price);
                        if gross < self.min_spread_pct {
                            continue;
                        }
                        let net = net_profit_pct(
                            buy.price,
                            sell.price,
                            self.fee_for(&buy.venue),
                            self.fee_for(&sell.venue),
                        );
                        found.push(ArbitrageOpportunity {
                            symbol: symbol.clone(),
                            buy_venue: buy.venue.clone(),
                            buy_price: buy.price,
                            sell_venue: sell.venue.clone(),
                            sell_price: sell.price,
                            gross_spread_pct: gross,
                            net_profit_pct: net,
                            viable: net >= self.min_net_pct,
                        });
                    }
                }
            }
        }

        found.sort_by(|a, b| {
            b.net_profit_pct
                .partial_cmp(&a.net_profit_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.best = found.iter().find(|o| o.viable).cloned();
        found
    }

    /// The top viable opportunity from the latest scan.
    pub fn best_opportunity(&self) -> Option<&ArbitrageOpportunity> {
        self.best.as_ref()
    }

    /// Record an executed opportunity; oldest entries are evicted once the
    /// ring is full.
    pub fn record_execution(&mut self, opportunity: ArbitrageOpportunity, profit_usd: f64, now_ts: u64) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(ExecutedArb { opportunity, profit_usd, executed_ts: now_ts });
    }

    pub fn executed_history(&self) -> impl Iterator<Item = &ExecutedArb> {
        self.history.iter()
    }

    pub fn executed_count(&self) -> usize {
        self.history.len()
    }

    pub fn total_executed_profit(&self) -> f64 {
        self.history.iter().map(|e| e.profit_usd).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scanner() -> ArbScanner {
        // ttl 30s, min gross 0.2%, net floor 0.05%, default fee 0.1%
        ArbScanner::new(30, 0.002, 0.0005, 0.001, 4)
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detects_profitable_spread() {
        let mut scanner = make_scanner();
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "kraken", 100_600.0, 1000);

        let opps = scanner.scan_direct(&syms(&["BTCUSDT"]), 1005);
        // Only the profitable orientation clears the spread gate
        assert_eq!(opps.len(), 1);
        let best = scanner.best_opportunity().expect("spread should be viable");
        assert_eq!(best.buy_venue, "binance");
        assert_eq!(best.sell_venue, "kraken");
        // gross 0.6%, fees 0.2% → net 0.4%
        assert!((best.gross_spread_pct - 0.006).abs() < 1e-9);
        assert!((best.net_profit_pct - 0.004).abs() < 1e-9);
        assert!(best.viable);
    }

    #[test]
    fn test_scan_symmetry() {
        // A/B and B/A give equal-magnitude, sign-flipped nets.
        let net_fwd = net_profit_pct(100.0, 101.0, 0.001, 0.001);
        let net_rev = net_profit_pct(101.0, 100.0, 0.001, 0.001);
        assert!((net_fwd + net_rev).abs() < 1e-12, "fwd={} rev={}", net_fwd, net_rev);
        assert!((net_fwd.abs() - net_rev.abs()).abs() < 1e-12);
    }

    #[test]
    fn test_sub_threshold_spread_ignored() {
        let mut scanner = make_scanner();
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "kraken", 100_100.0, 1000); // 0.1% < 0.2%

        let opps = scanner.scan_direct(&syms(&["BTCUSDT"]), 1005);
        assert!(opps.is_empty());
        assert!(scanner.best_opportunity().is_none());
    }

    #[test]
    fn test_viability_floor_after_fees() {
        let mut scanner = make_scanner();
        // gross 0.21% clears the spread gate, but fees eat it: net 0.01% < 0.05%
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "kraken", 100_210.0, 1000);

        let opps = scanner.scan_direct(&syms(&["BTCUSDT"]), 1005);
        assert_eq!(opps.iter().filter(|o| o.viable).count(), 0);
        assert!(scanner.best_opportunity().is_none());
    }

    #[test]
    fn test_stale_price_excluded() {
        let mut scanner = make_scanner();
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "kraken", 101_000.0, 900); // 125s old at scan

        let opps = scanner.scan_direct(&syms(&["BTCUSDT"]), 1025);
        assert!(opps.is_empty(), "stale leg must not form a pair");
    }

    #[test]
    fn test_price_overwrite() {
        let mut scanner = make_scanner();
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "binance", 100_500.0, 1010);
        let p = scanner.price("BTCUSDT", "binance").unwrap();
        assert!((p.price - 100_500.0).abs() < 1e-9);
        assert_eq!(p.ts, 1010);
    }

    #[test]
    fn test_best_is_highest_net_across_symbols() {
        let mut scanner = make_scanner();
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "kraken", 100_500.0, 1000); // net 0.3%
        scanner.update_price("ETHUSDT", "binance", 2_000.0, 1000);
        scanner.update_price("ETHUSDT", "kraken", 2_020.0, 1000); // net 0.8%

        let opps = scanner.scan_direct(&syms(&["BTCUSDT", "ETHUSDT"]), 1005);
        assert!(opps.len() >= 2);
        let best = scanner.best_opportunity().unwrap();
        assert_eq!(best.symbol, "ETHUSDT");
    }

    #[test]
    fn test_per_venue_fee_override() {
        let mut scanner = make_scanner();
        scanner.set_venue_fee("kraken", 0.004);
        scanner.update_price("BTCUSDT", "binance", 100_000.0, 1000);
        scanner.update_price("BTCUSDT", "kraken", 100_600.0, 1000);

        scanner.scan_direct(&syms(&["BTCUSDT"]), 1005);
        // gross 0.6% − 0.1% − 0.4% = 0.1%
        let best = scanner.best_opportunity().unwrap();
        assert!((best.net_profit_pct - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_history_ring_evicts_oldest() {
        let mut scanner = make_scanner(); // capacity 4
        let opp = ArbitrageOpportunity {
            symbol: "BTCUSDT".to_string(),
            buy_venue: "binance".to_string(),
            buy_price: 100.0,
            sell_venue: "kraken".to_string(),
            sell_price: 101.0,
            gross_spread_pct: 0.01,
            net_profit_pct: 0.008,
            viable: true,
        };
        for i in 0..6 {
            scanner.record_execution(opp.clone(), i as f64, 1000 + i);
        }
        assert_eq!(scanner.executed_count(), 4);
        let profits: Vec<f64> = scanner.executed_history().map(|e| e.profit_usd).collect();
        assert_eq!(profits, vec![2.0, 3.0, 4.0, 5.0]);
        assert!((scanner.total_executed_profit() - 14.0).abs() < 1e-9);
    }
}
