//! Portfolio exposure limiter.
//!
//! Every symbol maps to exactly one correlation group; a position's "heat"
//! is its capital share scaled by the group's multiplier. Two ceilings are
//! enforced before any position may open: a global cap across all groups and
//! a tighter per-group cap, so a portfolio concentrated in one group hits
//! the group ceiling first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Correlation groups
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationGroup {
    Btc,
    Eth,
    LayerOne,
    Stable,
    /// Catch-all for anything unclassified; treated with the most caution
    Alt,
}

impl CorrelationGroup {
    /// Static lookup; unknown symbols land in the lowest-priority group.
    pub fn classify(symbol: &str) -> Self {
        let s = symbol.to_uppercase();
        if s.starts_with("BTC") || s.starts_with("XBT") {
            CorrelationGroup::Btc
        } else if s.starts_with("ETH") {
            CorrelationGroup::Eth
        } else if ["SOL", "AVAX", "ADA", "DOT", "NEAR", "ATOM"].iter().any(|p| s.starts_with(p)) {
            CorrelationGroup::LayerOne
        } else if ["USDT", "USDC", "DAI", "TUSD"].iter().any(|p| s.starts_with(p)) {
            CorrelationGroup::Stable
        } else {
            CorrelationGroup::Alt
        }
    }

    /// Heat amplification per group: correlated, high-beta groups burn
    /// hotter per dollar than stables.
    pub fn multiplier(&self) -> f64 {
        match self {
            CorrelationGroup::Btc => 1.0,
            CorrelationGroup::Eth => 1.1,
            CorrelationGroup::LayerOne => 1.25,
            CorrelationGroup::Stable => 0.5,
            CorrelationGroup::Alt => 1.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationGroup::Btc => "btc",
            CorrelationGroup::Eth => "eth",
            CorrelationGroup::LayerOne => "layer1",
            CorrelationGroup::Stable => "stable",
            CorrelationGroup::Alt => "alt",
        }
    }
}

// =============================================================================
// Heat map
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatEntry {
    pub group: CorrelationGroup,
    pub heat: f64,
    pub size_usd: f64,
}

/// Verdict from a pre-trade exposure check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatCheck {
    pub allowed: bool,
    pub reason: &'static str,
    pub projected_total: f64,
    pub projected_group: f64,
}

pub struct HeatLimiter {
    entries: HashMap<String, HeatEntry>,
    total_capital: f64,
    global_cap: f64,
    group_cap: f64,
}

impl HeatLimiter {
    pub fn new(total_capital: f64, global_cap: f64, group_cap: f64) -> Self {
        Self { entries: HashMap::new(), total_capital: total_capital.max(1e-9), global_cap, group_cap }
    }

    /// Capital base for the heat ratio; refreshed from the allocator each
    /// cycle so heat tracks equity drift.
    pub fn set_total_capital(&mut self, capital: f64) {
        self.total_capital = capital.max(1e-9);
        // Re-derive heat for live entries against the new base
        let capital = self.total_capital;
        for entry in self.entries.values_mut() {
            entry.heat = entry.size_usd / capital * entry.group.multiplier();
        }
    }

    pub fn heat_for(&self, symbol: &str, size_usd: f64) -> f64 {
        size_usd / self.total_capital * CorrelationGroup::classify(symbol).multiplier()
    }

    pub fn total_heat(&self) -> f64 {
        self.entries.values().map(|e| e.heat).sum()
    }

    pub fn group_heat(&self, group: CorrelationGroup) -> f64 {
        self.entries.values().filter(|e| e.group == group).map(|e| e.heat).sum()
    }

    pub fn entry(&self, symbol: &str) -> Option<&HeatEntry> {
        self.entries.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Would adding this position breach either ceiling?
    pub fn can_add_position(&self, symbol: &str, size_usd: f64) -> HeatCheck {
        let group = CorrelationGroup::classify(symbol);
        let added = self.heat_for(symbol, size_usd);
        let projected_total = self.total_heat() + added;
        let projected_group = self.group_heat(group) + added;

        if projected_group > self.group_cap {
            return HeatCheck {
                allowed: false,
                reason: "group_heat_cap",
                projected_total,
                projected_group,
            };
        }
        if projected_total > self.global_cap {
            return HeatCheck {
                allowed: false,
                reason: "global_heat_cap",
                projected_total,
                projected_group,
            };
        }
        HeatCheck { allowed: true, reason: "within_caps", projected_total, projected_group }
    }

    /// Add exposure for a symbol; additive when already present. Refuses any
    /// mutation that would breach a cap.
    pub fn add_position(&mut self, symbol: &str, size_usd: f64) -> HeatCheck {
        let check = self.can_add_position(symbol, size_usd);
        if !check.allowed {
            return check;
        }
        let group = CorrelationGroup::classify(symbol);
        let added = self.heat_for(symbol, size_usd);
        let entry = self
            .entries
            .entry(symbol.to_string())
            .or_insert(HeatEntry { group, heat: 0.0, size_usd: 0.0 });
        entry.heat += added;
        entry.size_usd += size_usd;
        check
    }

    pub fn remove_position(&mut self, symbol: &str) -> Option<HeatEntry> {
        self.entries.remove(symbol)
    }

    /// Replace a symbol's exposure with a new size (resize in place).
    pub fn update_position(&mut self, symbol: &str, new_size_usd: f64) {
        let group = CorrelationGroup::classify(symbol);
        let heat = self.heat_for(symbol, new_size_usd);
        self.entries
            .insert(symbol.to_string(), HeatEntry { group, heat, size_usd: new_size_usd });
    }

    /// Invert the heat formula: the largest additional size for this symbol
    /// that stays within both ceilings. Used to clip an allocator suggestion.
    pub fn suggested_position_size(&self, symbol: &str) -> f64 {
        let group = CorrelationGroup::classify(symbol);
        let room_global = (self.global_cap - self.total_heat()).max(0.0);
        let room_group = (self.group_cap - self.group_heat(group)).max(0.0);
        let room = room_global.min(room_group);
        room * self.total_capital / group.multiplier()
    }
}

// =============================================================================
// Tests
// =============================================================================
