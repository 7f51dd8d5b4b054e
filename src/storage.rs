//! Best-effort persistence.
//!
//! Trade flow never waits on the database: writes go through a bounded queue
//! into a writer task, and a full queue drops the record with a warning.
//! Only the cold-start read path (rehydrating open positions) is
//! synchronous with the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capital::CapitalState;
use crate::ledger::{ClosedPosition, PositionRecord};
use crate::logging::{self, obj, v_str, Domain, Level};
use crate::retry::{retry_async, RetryConfig};

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PersistRecord {
    PositionOpened(PositionRecord),
    PositionClosed(ClosedPosition),
    CapitalSnapshot { ts: u64, state: CapitalState },
}

impl PersistRecord {
    fn kind(&self) -> &'static str {
        match self {
            PersistRecord::PositionOpened(_) => "position_opened",
            PersistRecord::PositionClosed(_) => "position_closed",
            PersistRecord::CapitalSnapshot { .. } => "capital_snapshot",
        }
    }
}

#[async_trait]
pub trait PersistenceBackend: Send {
    async fn save(&mut self, record: &PersistRecord) -> Result<()>;
    async fn load_open_positions(&mut self) -> Result<Vec<PositionRecord>>;
}

// =============================================================================
// Sqlite backend
// =============================================================================

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn new(path: &str) -> Result<Self> {
        let mut backend = Self { conn: Connection::open(path)? };
        backend.init()?;
        Ok(backend)
    }

    fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS positions_open (
                symbol TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS positions_closed (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                record TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS capital_snapshots (
                ts INTEGER NOT NULL,
                state TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for SqliteBackend {
    async fn save(&mut self, record: &PersistRecord) -> Result<()> {
        match record {
            PersistRecord::PositionOpened(pos) => {
                let body = serde_json::to_string(pos)?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO positions_open (symbol, record) VALUES (?1, ?2)",
                    params![pos.symbol, body],
                )?;
            }
            PersistRecord::PositionClosed(closed) => {
                let body = serde_json::to_string(closed)?;
                let tx = self.conn.transaction()?;
                tx.execute(
                    "DELETE FROM positions_open WHERE symbol = ?1",
                    params![closed.record.symbol],
                )?;
                tx.execute(
                    "INSERT INTO positions_closed (ts, symbol, record) VALUES (?1, ?2, ?3)",
                    params![closed.closed_ts as i64, closed.record.symbol, body],
                )?;
                tx.commit()?;
            }
            PersistRecord::CapitalSnapshot { ts, state } => {
                let body = serde_json::to_string(state)?;
                self.conn.execute(
                    "INSERT INTO capital_snapshots (ts, state) VALUES (?1, ?2)",
                    params![*ts as i64, body],
                )?;
            }
        }
        Ok(())
    }

    async fn load_open_positions(&mut self) -> Result<Vec<PositionRecord>> {
        let mut stmt = self.conn.prepare("SELECT record FROM positions_open")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let body = row?;
            // A malformed row is skipped, not fatal at startup
            match serde_json::from_str::<PositionRecord>(&body) {
                Ok(record) => out.push(record),
                Err(err) => logging::log(
                    Level::Warn,
                    Domain::Persist,
                    "rehydrate_skip",
                    obj(&[("error", v_str(&err.to_string()))]),
                ),
            }
        }
        Ok(out)
    }
}

// =============================================================================
// HTTP backend (database behind a REST API)
// =============================================================================

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        }
    }
}

#[async_trait]
impl PersistenceBackend for HttpBackend {
    async fn save(&mut self, record: &PersistRecord) -> Result<()> {
        let url = format!("{}/records", self.base_url);
        let payload = json!({ "kind": record.kind(), "record": record });
        retry_async(&self.retry, "persist_save", || {
            let req = self.client.post(&url).json(&payload);
            async move {
                let resp = req.send().await.context("persistence write send")?;
                resp.error_for_status().context("persistence write rejected")?;
                Ok(())
            }
        })
        .await
        .with_context(|| format!("POST {}", url))?;
        Ok(())
    }

    async fn load_open_positions(&mut self) -> Result<Vec<PositionRecord>> {
        let url = format!("{}/positions/open", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;
        let records: Vec<PositionRecord> = resp.json().await.context("decode open positions")?;
        Ok(records)
    }
}

// =============================================================================
// Queue handle
// =============================================================================

/// Cloneable front of the persistence queue. `enqueue` never blocks and
/// never fails the caller; a full or closed queue drops the record.
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<PersistRecord>,
}

impl PersistenceHandle {
    /// Start the writer task over the given backend. Dropping every handle
    /// clone drains the queue and ends the task.
    pub fn spawn(mut backend: Box<dyn PersistenceBackend>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PersistRecord>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = backend.save(&record).await {
                    logging::log(
                        Level::Warn,
                        Domain::Persist,
                        "write_failed",
                        obj(&[
                            ("kind", v_str(record.kind())),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                }
            }
        });
        (Self { tx }, task)
    }

    pub fn enqueue(&self, record: PersistRecord) {
        let kind = record.kind();
        if self.tx.try_send(record).is_err() {
            logging::log(
                Level::Warn,
                Domain::Persist,
                "write_dropped",
                obj(&[("kind", v_str(kind))]),
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CloseReason, RiskSnapshot, Side};

    fn record(symbol: &str) -> PositionRecord {
        PositionRecord {
            symbol: symbol.to_string(),
            venue: "binance".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            quantity: 1.0,
            notional_usd: 100.0,
            take_profit: 103.0,
            stop_loss: 98.5,
            trailing: None,
            opened_ts: 1000,
            unrealized_pnl: 0.0,
            entry_risk: RiskSnapshot { confidence: 0.8, coherence: 0.7, tier: 1, heat_at_entry: 0.1 },
        }
    }

    #[tokio::test]
    async fn test_sqlite_open_persists_and_rehydrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let path = path.to_str().unwrap();

        let mut backend = SqliteBackend::new(path).unwrap();
        backend.save(&PersistRecord::PositionOpened(record("BTCUSDT"))).await.unwrap();
        backend.save(&PersistRecord::PositionOpened(record("ETHUSDT"))).await.unwrap();

        let mut reopened = SqliteBackend::new(path).unwrap();
        let loaded = reopened.load_open_positions().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|p| p.symbol == "BTCUSDT"));
    }

    #[tokio::test]
    async fn test_sqlite_close_clears_open_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let path = path.to_str().unwrap();

        let mut backend = SqliteBackend::new(path).unwrap();
        backend.save(&PersistRecord::PositionOpened(record("BTCUSDT"))).await.unwrap();
        let closed = ClosedPosition {
            record: record("BTCUSDT"),
            exit_price: 103.0,
            realized_pnl: 3.0,
            reason: CloseReason::TakeProfit,
            closed_ts: 2000,
        };
        backend.save(&PersistRecord::PositionClosed(closed)).await.unwrap();

        let loaded = backend.load_open_positions().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_reopen_same_symbol_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let path = path.to_str().unwrap();

        let mut backend = SqliteBackend::new(path).unwrap();
        backend.save(&PersistRecord::PositionOpened(record("BTCUSDT"))).await.unwrap();
        let mut updated = record("BTCUSDT");
        updated.quantity = 2.0;
        backend.save(&PersistRecord::PositionOpened(updated)).await.unwrap();

        let loaded = backend.load_open_positions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!((loaded[0].quantity - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_queue_drains_through_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let path_str = path.to_str().unwrap().to_string();

        let backend = SqliteBackend::new(&path_str).unwrap();
        let (handle, task) = PersistenceHandle::spawn(Box::new(backend), 16);
        handle.enqueue(PersistRecord::PositionOpened(record("BTCUSDT")));
        handle.enqueue(PersistRecord::CapitalSnapshot {
            ts: 1000,
            state: CapitalState {
                total_equity: 10_000.0,
                available: 7_500.0,
                reserved: 500.0,
                harvested: 0.0,
                unrealized_pnl: 0.0,
                open_positions: 1,
                kelly_fraction: 0.25,
            },
        });
        drop(handle);
        task.await.unwrap();

        let mut reopened = SqliteBackend::new(&path_str).unwrap();
        let loaded = reopened.load_open_positions().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_on_full_queue_drops_without_error() {
        // Writer that never drains: capacity 1, second enqueue must not panic
        struct StallBackend;
        #[async_trait]
        impl PersistenceBackend for StallBackend {
            async fn save(&mut self, _record: &PersistRecord) -> Result<()> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(())
            }
            async fn load_open_positions(&mut self) -> Result<Vec<PositionRecord>> {
                Ok(vec![])
            }
        }

        let (handle, task) = PersistenceHandle::spawn(Box::new(StallBackend), 1);
        for i in 0..10 {
            handle.enqueue(PersistRecord::PositionOpened(record(&format!("S{}", i))));
        }
        drop(handle);
        task.abort();
    }
}
