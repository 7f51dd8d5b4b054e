//! Venue order rules: lot size, tick size, and notional minimums.
//!
//! Every computed order is rounded and re-validated against the venue's
//! rules before dispatch; an order that cannot be made compliant is refused,
//! never sent.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VenueRules {
    pub min_qty: f64,
    pub max_qty: f64,
    pub step_size: f64,
    pub tick_size: f64,
    pub min_notional: f64,
}

impl Default for VenueRules {
    fn default() -> Self {
        Self {
            min_qty: 0.0001,
            max_qty: 1_000.0,
            step_size: 0.0001,
            tick_size: 0.01,
            min_notional: 10.0,
        }
    }
}

/// Quantity/price pair after rounding to venue increments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundedOrder {
    pub qty: f64,
    pub price: f64,
    pub notional: f64,
}

pub trait VenueRulesService: Send {
    fn rules(&self, symbol: &str, venue: &str) -> VenueRules;
}

/// In-memory rules table with per-(symbol, venue) overrides.
pub struct StaticVenueRules {
    default: VenueRules,
    overrides: HashMap<(String, String), VenueRules>,
}

impl StaticVenueRules {
    pub fn new(default: VenueRules) -> Self {
        Self { default, overrides: HashMap::new() }
    }

    pub fn set(&mut self, symbol: &str, venue: &str, rules: VenueRules) {
        self.overrides.insert((symbol.to_string(), venue.to_string()), rules);
    }
}

impl Default for StaticVenueRules {
    fn default() -> Self {
        Self::new(VenueRules::default())
    }
}

impl VenueRulesService for StaticVenueRules {
    fn rules(&self, symbol: &str, venue: &str) -> VenueRules {
        self.overrides
            .get(&(symbol.to_string(), venue.to_string()))
            .copied()
            .unwrap_or(self.default)
    }
}

fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

/// Round an order down to venue increments and validate the result.
pub fn round_and_validate(rules: &VenueRules, qty: f64, price: f64) -> Result<RoundedOrder, &'static str> {
    if price <= 0.0 || qty <= 0.0 {
        return Err("non_positive_order");
    }
    let qty = floor_to_step(qty, rules.step_size);
    let price = floor_to_step(price, rules.tick_size);

    if qty < rules.min_qty {
        return Err("below_min_qty");
    }
    if qty > rules.max_qty {
        return Err("above_max_qty");
    }
    let notional = qty * price;
    if notional < rules.min_notional {
        return Err("below_min_notional");
    }
    Ok(RoundedOrder { qty, price, notional })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> VenueRules {
        VenueRules { min_qty: 0.001, max_qty: 10.0, step_size: 0.001, tick_size: 0.5, min_notional: 25.0 }
    }

    #[test]
    fn test_rounds_down_to_increments() {
        let r = round_and_validate(&rules(), 0.12345, 101.37).unwrap();
        assert!((r.qty - 0.123).abs() < 1e-12);
        assert!((r.price - 101.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_below_min_qty() {
        assert_eq!(round_and_validate(&rules(), 0.0005, 100.0).unwrap_err(), "below_min_qty");
    }

    #[test]
    fn test_rejects_above_max_qty() {
        assert_eq!(round_and_validate(&rules(), 11.0, 100.0).unwrap_err(), "above_max_qty");
    }

    #[test]
    fn test_rejects_below_min_notional() {
        // 0.001 × 100 = $0.10, far under the $25 floor
        assert_eq!(round_and_validate(&rules(), 0.001, 100.0).unwrap_err(), "below_min_notional");
    }

    #[test]
    fn test_rejects_non_positive() {
        assert_eq!(round_and_validate(&rules(), 0.0, 100.0).unwrap_err(), "non_positive_order");
        assert_eq!(round_and_validate(&rules(), 1.0, 0.0).unwrap_err(), "non_positive_order");
    }

    #[test]
    fn test_override_lookup() {
        let mut svc = StaticVenueRules::default();
        let custom = VenueRules { min_notional: 100.0, ..VenueRules::default() };
        svc.set("BTCUSDT", "kraken", custom);
        assert_eq!(svc.rules("BTCUSDT", "kraken").min_notional, 100.0);
        assert_eq!(svc.rules("BTCUSDT", "binance").min_notional, 10.0);
    }
}
