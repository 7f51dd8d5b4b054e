//! Execution seam: the only boundary where real capital moves.
//!
//! The engine treats a confirmed success from this trait as the sole
//! trigger for mutating capital, heat, and the ledger; anything else leaves
//! state untouched. The paper executor keeps the full pipeline honest in
//! simulation; the rejecting executor exercises the failure path in tests.

use async_trait::async_trait;

use crate::ledger::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub symbol: String,
    pub venue: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub order_id: Option<String>,
    pub executed_price: Option<f64>,
    pub executed_qty: f64,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn rejected(error: &str) -> Self {
        Self {
            success: false,
            order_id: None,
            executed_price: None,
            executed_qty: 0.0,
            error: Some(error.to_string()),
        }
    }
}

#[async_trait]
pub trait ExecutionApi: Send {
    async fn execute(&mut self, ticket: &OrderTicket) -> ExecutionOutcome;
}

// =============================================================================
// Paper executor
// =============================================================================

/// Fills everything at the requested price. Makes the integration explicit
/// without touching a venue.
pub struct PaperExecutor {
    order_seq: u64,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self { order_seq: 0 }
    }
}

impl Default for PaperExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionApi for PaperExecutor {
    async fn execute(&mut self, ticket: &OrderTicket) -> ExecutionOutcome {
        self.order_seq += 1;
        ExecutionOutcome {
            success: true,
            order_id: Some(format!("paper-{}-{}", self.order_seq, ticket.client_id)),
            executed_price: Some(ticket.price),
            executed_qty: ticket.qty,
            error: None,
        }
    }
}

/// Always refuses. For tests of the no-mutation-on-failure path.
pub struct RejectingExecutor {
    pub reason: &'static str,
}

#[async_trait]
impl ExecutionApi for RejectingExecutor {
    async fn execute(&mut self, _ticket: &OrderTicket) -> ExecutionOutcome {
        ExecutionOutcome::rejected(self.reason)
    }
}
