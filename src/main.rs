use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use tokio::time::{sleep, Duration};

use quorumfx::clock::{Clock, SystemClock};
use quorumfx::engine::TradingEngine;
use quorumfx::exec::PaperExecutor;
use quorumfx::feed::SimFeed;
use quorumfx::learning::StaticLearning;
use quorumfx::logging::{json_log, obj, v_num, v_str, Domain};
use quorumfx::producer;
use quorumfx::state::Config;
use quorumfx::storage::{HttpBackend, PersistenceBackend, PersistenceHandle, SqliteBackend};
use quorumfx::venue::StaticVenueRules;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    json_log(
        Domain::System,
        "startup",
        obj(&[
            ("symbol", v_str(&cfg.symbol)),
            ("simulation", v_str(if cfg.simulation { "on" } else { "off" })),
            ("tick_secs", v_num(cfg.tick_secs as f64)),
            ("equity", v_num(cfg.initial_equity)),
        ]),
    );

    // Persistence: REST database when configured, local sqlite otherwise.
    let mut backend: Box<dyn PersistenceBackend> = match &cfg.persist_base_url {
        Some(base) => {
            json_log(Domain::Persist, "backend", obj(&[("kind", v_str("http")), ("base", v_str(base))]));
            Box::new(HttpBackend::new(base))
        }
        None => {
            json_log(Domain::Persist, "backend", obj(&[("kind", v_str("sqlite")), ("path", v_str(&cfg.sqlite_path))]));
            Box::new(SqliteBackend::new(&cfg.sqlite_path)?)
        }
    };

    // Cold start: rehydrate open positions before the queue takes the backend.
    let restored = match backend.load_open_positions().await {
        Ok(records) => records,
        Err(err) => {
            json_log(
                Domain::Persist,
                "rehydrate_unavailable",
                obj(&[("error", v_str(&err.to_string()))]),
            );
            Vec::new()
        }
    };
    let (persistence, _writer) = PersistenceHandle::spawn(backend, cfg.persist_queue_capacity);

    let producers = producer::build_default_set(&cfg);
    let feed = Box::new(SimFeed::new(100.0));
    let executor = Box::new(PaperExecutor::new());
    let learning = Box::new(StaticLearning::new(&cfg));
    let venue_rules = Box::new(StaticVenueRules::default());

    let mut engine = TradingEngine::new(
        cfg.clone(),
        clock.clone(),
        producers,
        feed,
        executor,
        learning,
        venue_rules,
        persistence,
    );
    let count = engine.rehydrate(restored);
    if count > 0 {
        json_log(Domain::System, "rehydrated_positions", obj(&[("count", v_num(count as f64))]));
    }

    loop {
        // Secondary venue quotes drift around the primary; a real deployment
        // replaces this with its market-data transport.
        if let Some(primary) = engine.scanner().price(&cfg.symbol, "primary").map(|p| p.price) {
            let mut rng = rand::thread_rng();
            for venue in cfg.venues.iter().skip(1) {
                let wobble: f64 = rng.gen_range(-0.004..0.004);
                let quoted = primary * (1.0 + wobble);
                engine.update_venue_price(&cfg.symbol, venue, quoted);
            }
        }

        let report = engine.run_cycle().await?;
        json_log(
            Domain::Engine,
            "cycle_done",
            obj(&[
                ("cycle", v_num(report.cycle as f64)),
                ("action", v_str(report.decision.action.as_str())),
                ("reason", v_str(&report.decision.reason)),
                ("closed", v_num(report.closed.len() as f64)),
            ]),
        );

        let now = clock.now_ts();
        let sleep_for = cfg.sleep_until_next_tick(now);
        sleep(Duration::from_secs(sleep_for)).await;
    }
}
