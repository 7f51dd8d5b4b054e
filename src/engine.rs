//! The orchestrator: one serialized fusion cycle per tick.
//!
//! Each cycle pulls a snapshot, runs every producer, reads the bus, refreshes
//! capital and heat, scans for arbitrage, walks open positions, and fuses
//! everything into a single {Buy, Sell, Hold} decision. Execution is the only
//! place capital moves: component state mutates solely after a confirmed
//! fill, so a failed or rejected dispatch leaves the engine exactly where it
//! was.
//!
//! Gate order is fixed and short-circuits on the first refusal:
//! exposure → capital → readiness → coherence → confidence → strict quorum.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::arbitrage::{ArbScanner, ArbitrageOpportunity};
use crate::bus::{Consensus, Direction, LivenessRegistry, SignalBus};
use crate::capital::CapitalAllocator;
use crate::clock::Clock;
use crate::exec::{ExecutionApi, OrderTicket};
use crate::feed::MarketDataFeed;
use crate::heat::HeatLimiter;
use crate::ledger::{CloseReason, PositionLedger, PositionRecord, RiskSnapshot, Side};
use crate::learning::{LearningService, Thresholds};
use crate::logging::{self, json_log, log_audit, log_decision, obj, state_hash, v_num, v_str, Domain, Level};
use crate::producer::SignalProducer;
use crate::retry::RetryConfig;
use crate::state::{Config, MarketSnapshot};
use crate::storage::{PersistRecord, PersistenceHandle};
use crate::venue::{round_and_validate, VenueRulesService};

// =============================================================================
// Cycle guard
// =============================================================================

/// Non-reentrancy guard. Acquired at cycle start, released on drop, so every
/// exit path (including early returns) frees the next tick.
struct CycleGuard {
    flag: Arc<AtomicBool>,
}

impl CycleGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag: Arc::clone(flag) })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Decisions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleDecision {
    pub action: TradeAction,
    pub symbol: String,
    pub reason: String,
    pub size_usd: f64,
    pub consensus: Option<Consensus>,
}

impl CycleDecision {
    fn hold(symbol: &str, reason: &str, consensus: Option<Consensus>) -> Self {
        Self {
            action: TradeAction::Hold,
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            size_usd: 0.0,
            consensus,
        }
    }
}

/// What one cycle did, for callers and tests.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub decision: CycleDecision,
    pub executed: bool,
    pub closed: Vec<(String, CloseReason, f64)>,
    pub skipped: Option<&'static str>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub cycles: u64,
    pub buys: u64,
    pub sells: u64,
    pub holds: u64,
    pub skipped: u64,
}

// =============================================================================
// Engine
// =============================================================================

pub struct TradingEngine {
    cfg: Config,
    clock: Arc<dyn Clock>,
    bus: SignalBus,
    liveness: LivenessRegistry,
    capital: CapitalAllocator,
    heat: HeatLimiter,
    ledger: PositionLedger,
    scanner: ArbScanner,
    producers: Vec<Box<dyn SignalProducer>>,
    feed: Box<dyn MarketDataFeed>,
    executor: Box<dyn ExecutionApi>,
    learning: Box<dyn LearningService>,
    venue_rules: Box<dyn VenueRulesService>,
    persistence: PersistenceHandle,
    retry: RetryConfig,
    cycle_flag: Arc<AtomicBool>,
    cycle_seq: u64,
    stats: CycleStats,
    /// Cumulative realized P&L net of harvested profit; trading equity is
    /// initial equity plus this.
    realized_net: f64,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        clock: Arc<dyn Clock>,
        producers: Vec<Box<dyn SignalProducer>>,
        feed: Box<dyn MarketDataFeed>,
        executor: Box<dyn ExecutionApi>,
        learning: Box<dyn LearningService>,
        venue_rules: Box<dyn VenueRulesService>,
        persistence: PersistenceHandle,
    ) -> Self {
        let now = clock.now_ts();
        let mut liveness = LivenessRegistry::new(cfg.liveness_timeout_secs);
        for producer in &producers {
            liveness.register(producer.name(), now);
        }
        let bus = SignalBus::new(cfg.signal_freshness_secs, cfg.consensus_threshold, cfg.readiness_ratio);
        let capital = CapitalAllocator::new(&cfg);
        let heat = HeatLimiter::new(cfg.initial_equity, cfg.heat_global_cap, cfg.heat_group_cap);
        let ledger = PositionLedger::new(&cfg);
        let scanner = ArbScanner::new(
            cfg.price_ttl_secs,
            cfg.arb_min_spread_pct,
            cfg.arb_min_net_pct,
            cfg.venue_fee_pct,
            cfg.arb_history_capacity,
        );
        Self {
            cfg,
            clock,
            bus,
            liveness,
            capital,
            heat,
            ledger,
            scanner,
            producers,
            feed,
            executor,
            learning,
            venue_rules,
            persistence,
            retry: RetryConfig::default(),
            cycle_flag: Arc::new(AtomicBool::new(false)),
            cycle_seq: 0,
            stats: CycleStats::default(),
            realized_net: 0.0,
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn capital(&self) -> &CapitalAllocator {
        &self.capital
    }

    pub fn heat(&self) -> &HeatLimiter {
        &self.heat
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn scanner(&self) -> &ArbScanner {
        &self.scanner
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Venue price refresh path, fed between cycles by whatever transport the
    /// deployment wires up.
    pub fn update_venue_price(&mut self, symbol: &str, venue: &str, price: f64) {
        let now = self.clock.now_ts();
        self.scanner.update_price(symbol, venue, price, now);
    }

    /// Cold-start rehydration of open positions: restore the ledger entry and
    /// re-reserve its capital and heat. Invalid rows are skipped.
    pub fn rehydrate(&mut self, records: Vec<PositionRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            let symbol = record.symbol.clone();
            let notional = record.notional_usd;
            match self.ledger.rehydrate(record) {
                Ok(()) => {
                    self.capital.reserve(&symbol, notional);
                    self.heat.update_position(&symbol, notional);
                    restored += 1;
                    json_log(
                        Domain::System,
                        "rehydrated",
                        obj(&[("symbol", v_str(&symbol)), ("notional", v_num(notional))]),
                    );
                }
                Err(reason) => logging::log(
                    Level::Warn,
                    Domain::System,
                    "rehydrate_skip",
                    obj(&[("symbol", v_str(&symbol)), ("reason", v_str(reason))]),
                ),
            }
        }
        restored
    }

    fn kill_file_present(&self) -> bool {
        std::path::Path::new(&self.cfg.kill_file).exists()
    }

    /// Pull the cycle's snapshot with bounded backoff. The suspension point
    /// lives here; everything after works on an owned value.
    async fn fetch_snapshot(&mut self, symbol: &str, now: u64) -> Result<MarketSnapshot> {
        let mut last_err = None;
        for attempt in 0..=self.retry.max_retries {
            match self.feed.fetch(symbol, now).await {
                Ok(snap) => return Ok(snap),
                Err(err) => {
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("snapshot fetch exhausted")))
    }

    /// One serialized fusion cycle. Never panics the process: producer and
    /// external failures degrade the cycle to Hold.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let guard = CycleGuard::acquire(&self.cycle_flag);
        let _guard = match guard {
            Some(g) => g,
            None => {
                self.stats.skipped += 1;
                return Ok(self.report_skipped(self.cycle_seq, "cycle_in_flight"));
            }
        };

        self.cycle_seq += 1;
        let cycle = self.cycle_seq;
        let now = self.clock.now_ts();
        let symbol = self.cfg.symbol.clone();

        // (1) Market snapshot; a failed pull skips the trading decision.
        let snapshot = match self.fetch_snapshot(&symbol, now).await {
            Ok(snap) if !snap.is_stale(now, self.cfg.tick_secs.saturating_mul(2)) => snap,
            Ok(_) => {
                self.stats.skipped += 1;
                json_log(Domain::Market, "snapshot_stale", obj(&[("symbol", v_str(&symbol))]));
                return Ok(self.report_skipped(cycle, "snapshot_stale"));
            }
            Err(err) => {
                self.stats.skipped += 1;
                logging::log(
                    Level::Warn,
                    Domain::Market,
                    "snapshot_unavailable",
                    obj(&[("symbol", v_str(&symbol)), ("error", v_str(&err.to_string()))]),
                );
                return Ok(self.report_skipped(cycle, "snapshot_unavailable"));
            }
        };

        // (2) Producers: failures are logged and that producer simply stays
        // silent this cycle, lowering the ready ratio.
        for producer in self.producers.iter_mut() {
            match producer.emit(&snapshot) {
                Ok(msg) => {
                    self.liveness.heartbeat(&msg.producer, now);
                    self.bus.publish(msg);
                }
                Err(err) => logging::log(
                    Level::Warn,
                    Domain::Signal,
                    "producer_failed",
                    obj(&[
                        ("producer", v_str(producer.name())),
                        ("error", v_str(&err.to_string())),
                    ]),
                ),
            }
        }

        // (3) Consensus
        let consensus = self.bus.check_consensus(&self.liveness, now);
        json_log(
            Domain::Signal,
            "consensus",
            obj(&[
                ("direction", v_str(consensus.direction.as_str())),
                ("score", v_num(consensus.score)),
                ("confidence", v_num(consensus.confidence)),
                ("ready", json!(consensus.ready)),
                ("fresh", v_num(consensus.fresh_producers as f64)),
                ("active", v_num(consensus.active_producers as f64)),
            ]),
        );

        // (4) Capital refresh; Kelly fraction and thresholds are polled.
        let thresholds = self.learning.poll();
        self.capital.set_kelly_fraction(thresholds.kelly_fraction);
        let unrealized = self.ledger.total_unrealized();
        let total_equity = self.cfg.initial_equity + self.realized_net;
        self.capital.update_equity(total_equity, unrealized);
        self.heat.set_total_capital(total_equity);

        // (6) Arbitrage scan; the primary feed price counts as a venue quote.
        self.scanner.update_price(&symbol, "primary", snapshot.price, now);
        let scan_symbols = self.cfg.scan_symbols.clone();
        self.scanner.scan_direct(&scan_symbols, now);
        if let Some(best) = self.scanner.best_opportunity().cloned() {
            json_log(
                Domain::Arb,
                "opportunity",
                obj(&[
                    ("symbol", v_str(&best.symbol)),
                    ("buy_venue", v_str(&best.buy_venue)),
                    ("sell_venue", v_str(&best.sell_venue)),
                    ("net_pct", v_num(best.net_profit_pct)),
                ]),
            );
            if !self.cfg.simulation {
                self.execute_arbitrage(best, now).await;
            }
        }

        // (7) Walk open positions and fire exits.
        let closed = self.update_positions(&snapshot, now).await;

        // (8) Fuse into one decision.
        let decision = self.decide(&snapshot, &consensus, &thresholds);
        log_decision(cycle, &decision.symbol, decision.action.as_str(), &decision.reason, consensus.confidence);

        // (9) Dispatch, and mutate only on confirmed success.
        let executed = if decision.action != TradeAction::Hold && !self.cfg.simulation {
            self.execute_entry(&decision, &snapshot, &consensus, now).await
        } else {
            false
        };

        self.stats.cycles += 1;
        match decision.action {
            TradeAction::Buy => self.stats.buys += 1,
            TradeAction::Sell => self.stats.sells += 1,
            TradeAction::Hold => self.stats.holds += 1,
        }
        if cycle % 20 == 0 {
            logging::log_cycle_summary(
                self.stats.cycles,
                self.stats.buys,
                self.stats.sells,
                self.stats.holds,
                self.stats.skipped,
            );
        }
        if self.cfg.persist_every_secs > 0 && now % self.cfg.persist_every_secs < self.cfg.tick_secs {
            self.persistence.enqueue(PersistRecord::CapitalSnapshot { ts: now, state: self.capital.state() });
        }

        let capital_state = self.capital.state();
        let digest = state_hash(&format!(
            "{}:{:.6}:{:.6}:{:.6}:{}",
            cycle, capital_state.total_equity, capital_state.available, consensus.score, decision.action.as_str()
        ));
        log_audit(cycle, &digest, decision.action.as_str());

        Ok(CycleReport { cycle, decision, executed, closed, skipped: None })
    }

    fn report_skipped(&self, cycle: u64, reason: &'static str) -> CycleReport {
        CycleReport {
            cycle,
            decision: CycleDecision::hold(&self.cfg.symbol, reason, None),
            executed: false,
            closed: Vec::new(),
            skipped: Some(reason),
        }
    }

    /// Mark every open position to the freshest price available and close
    /// whatever triggers. Closes dispatch through the executor unless in
    /// simulation; a failed close leaves the position open for the next
    /// cycle.
    async fn update_positions(&mut self, snapshot: &MarketSnapshot, now: u64) -> Vec<(String, CloseReason, f64)> {
        let mut closed = Vec::new();

        for pos_symbol in self.ledger.symbols() {
            let price = if pos_symbol == self.cfg.symbol {
                Some(snapshot.price)
            } else {
                // Fall back to the scanner's cache for non-candidate symbols
                self.scanner
                    .price(&pos_symbol, "primary")
                    .filter(|p| !p.is_stale(now, self.cfg.price_ttl_secs))
                    .map(|p| p.price)
            };
            let price = match price {
                Some(p) => p,
                None => continue, // stale or missing: the position waits, not guessed
            };

            let outcome = match self.ledger.update_price(&pos_symbol, price) {
                Some(o) => o,
                None => continue,
            };
            if outcome.trailing_activated {
                json_log(
                    Domain::Ledger,
                    "trailing_activated",
                    obj(&[("symbol", v_str(&pos_symbol)), ("price", v_num(price))]),
                );
            }

            let reason = match outcome.trigger {
                Some(r) => r,
                None => continue,
            };

            if self.cfg.simulation {
                json_log(
                    Domain::Ledger,
                    "close_signal",
                    obj(&[
                        ("symbol", v_str(&pos_symbol)),
                        ("reason", v_str(reason.as_str())),
                        ("mode", v_str("simulation")),
                    ]),
                );
                continue;
            }

            if let Some(realized) = self.close_position(&pos_symbol, price, reason, now).await {
                closed.push((pos_symbol, reason, realized));
            }
        }

        closed
    }

    /// Operator-initiated close at a given price, outside the cycle's own
    /// trigger logic. Routes through the executor like any other close.
    pub async fn manual_close(&mut self, symbol: &str, price: f64) -> Option<f64> {
        let now = self.clock.now_ts();
        self.close_position(symbol, price, CloseReason::Manual, now).await
    }

    /// Dispatch the closing order; only a confirmed fill mutates state.
    async fn close_position(
        &mut self,
        symbol: &str,
        price: f64,
        reason: CloseReason,
        now: u64,
    ) -> Option<f64> {
        let record = self.ledger.get(symbol)?.clone();
        let close_side = match record.side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        let ticket = OrderTicket {
            symbol: symbol.to_string(),
            venue: record.venue.clone(),
            side: close_side,
            qty: record.quantity,
            price,
            client_id: format!("C-{}-{}-close", symbol, now),
        };
        let outcome = self.executor.execute(&ticket).await;
        if !outcome.success {
            logging::log(
                Level::Warn,
                Domain::Exec,
                "close_failed",
                obj(&[
                    ("symbol", v_str(symbol)),
                    ("reason", v_str(reason.as_str())),
                    ("error", v_str(outcome.error.as_deref().unwrap_or("unknown"))),
                ]),
            );
            return None;
        }

        let exit_price = outcome.executed_price.unwrap_or(price);
        let closed = self.ledger.close_position(symbol, exit_price, reason, now)?;
        let release = self.capital.release(symbol, closed.realized_pnl);
        self.heat.remove_position(symbol);
        self.realized_net += closed.realized_pnl - release.harvested_delta;

        json_log(
            Domain::Ledger,
            "position_closed",
            obj(&[
                ("symbol", v_str(symbol)),
                ("reason", v_str(reason.as_str())),
                ("exit_price", v_num(exit_price)),
                ("realized_pnl", v_num(closed.realized_pnl)),
                ("harvested", v_num(release.harvested_delta)),
            ]),
        );
        let realized = closed.realized_pnl;
        self.persistence.enqueue(PersistRecord::PositionClosed(closed));
        Some(realized)
    }

    /// The gate chain. First refusal wins and becomes the Hold reason.
    fn decide(&self, snapshot: &MarketSnapshot, consensus: &Consensus, thresholds: &Thresholds) -> CycleDecision {
        let symbol = &self.cfg.symbol;

        if self.kill_file_present() {
            return CycleDecision::hold(symbol, "kill_file_present", Some(*consensus));
        }
        if consensus.direction == Direction::Neutral {
            return CycleDecision::hold(symbol, "consensus_neutral", Some(*consensus));
        }
        if self.ledger.get(symbol).is_some() {
            return CycleDecision::hold(symbol, "position_already_open", Some(*consensus));
        }

        // Gate 1: exposure limiter.
        let heat_room = self.heat.suggested_position_size(symbol);
        if heat_room < self.cfg.min_trade_usd {
            let check = self.heat.can_add_position(symbol, self.cfg.min_trade_usd);
            return CycleDecision::hold(symbol, check.reason, Some(*consensus));
        }

        // Gate 2: capital sufficiency.
        let tier = Self::tier_for(consensus.coherence);
        let quote = self.capital.calculate_position_size(consensus.confidence, snapshot.volatility, tier);
        if quote.amount_usd <= 0.0 {
            return CycleDecision::hold(symbol, quote.reason, Some(*consensus));
        }

        // Gate 3: consensus readiness.
        if !consensus.ready {
            return CycleDecision::hold(symbol, "bus_not_ready", Some(*consensus));
        }

        // Gate 4: coherence threshold.
        if consensus.coherence < thresholds.min_coherence {
            return CycleDecision::hold(symbol, "coherence_below_threshold", Some(*consensus));
        }

        // Gate 5: confidence threshold.
        if consensus.confidence < thresholds.min_confidence {
            return CycleDecision::hold(symbol, "confidence_below_threshold", Some(*consensus));
        }

        // Gate 6: strict quorum, every active producer must have voted.
        if self.cfg.strict_event_required && consensus.fresh_producers < consensus.active_producers {
            return CycleDecision::hold(symbol, "quorum_incomplete", Some(*consensus));
        }

        let size_usd = quote.amount_usd.min(heat_room);
        let action = match consensus.direction {
            Direction::Buy => TradeAction::Buy,
            Direction::Sell => TradeAction::Sell,
            Direction::Neutral => TradeAction::Hold,
        };
        CycleDecision {
            action,
            symbol: symbol.clone(),
            reason: format!("consensus_{}_size_{:.2}", consensus.direction.as_str().to_lowercase(), size_usd),
            size_usd,
            consensus: Some(*consensus),
        }
    }

    fn tier_for(coherence: f64) -> u8 {
        if coherence >= 0.75 {
            1
        } else if coherence >= 0.5 {
            2
        } else {
            3
        }
    }

    /// Round, validate, dispatch, and only on success reserve capital,
    /// add heat, and open the ledger entry.
    async fn execute_entry(
        &mut self,
        decision: &CycleDecision,
        snapshot: &MarketSnapshot,
        consensus: &Consensus,
        now: u64,
    ) -> bool {
        let symbol = &decision.symbol;
        let venue = self.cfg.venues.first().cloned().unwrap_or_else(|| "primary".to_string());
        let rules = self.venue_rules.rules(symbol, &venue);
        let raw_qty = decision.size_usd / snapshot.price;

        let rounded = match round_and_validate(&rules, raw_qty, snapshot.price) {
            Ok(r) => r,
            Err(reason) => {
                logging::log(
                    Level::Warn,
                    Domain::Exec,
                    "order_rejected_validation",
                    obj(&[("symbol", v_str(symbol)), ("reason", v_str(reason))]),
                );
                return false;
            }
        };

        let side = match decision.action {
            TradeAction::Buy => Side::Long,
            TradeAction::Sell => Side::Short,
            TradeAction::Hold => return false,
        };
        let ticket = OrderTicket {
            symbol: symbol.clone(),
            venue: venue.clone(),
            side,
            qty: rounded.qty,
            price: rounded.price,
            client_id: format!("C-{}-{}-open", symbol, now),
        };
        json_log(
            Domain::Exec,
            "order_dispatch",
            obj(&[
                ("symbol", v_str(symbol)),
                ("side", v_str(side.as_str())),
                ("qty", v_num(rounded.qty)),
                ("price", v_num(rounded.price)),
                ("client_id", v_str(&ticket.client_id)),
            ]),
        );

        let outcome = self.executor.execute(&ticket).await;
        if !outcome.success {
            logging::log(
                Level::Warn,
                Domain::Exec,
                "order_failed",
                obj(&[
                    ("symbol", v_str(symbol)),
                    ("error", v_str(outcome.error.as_deref().unwrap_or("unknown"))),
                ]),
            );
            return false;
        }

        // Partial fills commit only the executed quantity.
        let fill_qty = if outcome.executed_qty > 0.0 { outcome.executed_qty.min(rounded.qty) } else { rounded.qty };
        let fill_price = outcome.executed_price.unwrap_or(rounded.price);
        let notional = fill_qty * fill_price;

        if !self.capital.reserve(symbol, notional) {
            // Sizing already capped at half of available; reaching here means
            // equity moved mid-cycle. Surface it loudly and skip the book-keep.
            logging::log(
                Level::Error,
                Domain::Capital,
                "reserve_failed_post_fill",
                obj(&[("symbol", v_str(symbol)), ("notional", v_num(notional))]),
            );
            return false;
        }
        let heat_check = self.heat.add_position(symbol, notional);
        if !heat_check.allowed {
            self.capital.release(symbol, 0.0);
            logging::log(
                Level::Error,
                Domain::Heat,
                "heat_add_failed_post_fill",
                obj(&[("symbol", v_str(symbol)), ("reason", v_str(heat_check.reason))]),
            );
            return false;
        }

        let entry_risk = RiskSnapshot {
            confidence: consensus.confidence,
            coherence: consensus.coherence,
            tier: Self::tier_for(consensus.coherence),
            heat_at_entry: heat_check.projected_total,
        };
        match self.ledger.open_position(symbol, &venue, side, fill_price, fill_qty, entry_risk, now) {
            Ok(record) => {
                let record = record.clone();
                json_log(
                    Domain::Ledger,
                    "position_opened",
                    obj(&[
                        ("symbol", v_str(symbol)),
                        ("side", v_str(side.as_str())),
                        ("entry", v_num(fill_price)),
                        ("qty", v_num(fill_qty)),
                        ("tp", v_num(record.take_profit)),
                        ("sl", v_num(record.stop_loss)),
                    ]),
                );
                self.persistence.enqueue(PersistRecord::PositionOpened(record));
                true
            }
            Err(reason) => {
                // Roll the reservation back; the fill stands at the venue but
                // the book refused it (should not happen after the gates).
                self.capital.release(symbol, 0.0);
                self.heat.remove_position(symbol);
                logging::log(
                    Level::Error,
                    Domain::Ledger,
                    "open_refused_post_fill",
                    obj(&[("symbol", v_str(symbol)), ("reason", v_str(reason))]),
                );
                false
            }
        }
    }

    /// Round-trip the best spread: both legs must fill before anything is
    /// recorded.
    async fn execute_arbitrage(&mut self, opp: ArbitrageOpportunity, now: u64) {
        let qty = self.cfg.min_trade_usd / opp.buy_price;
        if qty <= 0.0 {
            return;
        }
        let buy = OrderTicket {
            symbol: opp.symbol.clone(),
            venue: opp.buy_venue.clone(),
            side: Side::Long,
            qty,
            price: opp.buy_price,
            client_id: format!("A-{}-{}-buy", opp.symbol, now),
        };
        let sell = OrderTicket {
            symbol: opp.symbol.clone(),
            venue: opp.sell_venue.clone(),
            side: Side::Short,
            qty,
            price: opp.sell_price,
            client_id: format!("A-{}-{}-sell", opp.symbol, now),
        };

        let buy_out = self.executor.execute(&buy).await;
        if !buy_out.success {
            logging::log(
                Level::Warn,
                Domain::Arb,
                "leg_failed",
                obj(&[("leg", v_str("buy")), ("symbol", v_str(&opp.symbol))]),
            );
            return;
        }
        let sell_out = self.executor.execute(&sell).await;
        if !sell_out.success {
            logging::log(
                Level::Warn,
                Domain::Arb,
                "leg_failed",
                obj(&[("leg", v_str("sell")), ("symbol", v_str(&opp.symbol))]),
            );
            return;
        }

        let profit = (opp.sell_price - opp.buy_price) * qty
            - (opp.buy_price + opp.sell_price) * qty * self.cfg.venue_fee_pct;
        self.realized_net += profit;
        json_log(
            Domain::Arb,
            "executed",
            obj(&[
                ("symbol", v_str(&opp.symbol)),
                ("profit_usd", v_num(profit)),
                ("net_pct", v_num(opp.net_profit_pct)),
            ]),
        );
        self.scanner.record_execution(opp, profit, now);
    }
}

// =============================================================================
// Tests
// =============================================================================
