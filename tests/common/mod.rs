use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use walletscope::errors::GatewayError;
use walletscope::ingestion::{EvaluationContext, TradeGateway};
use walletscope::intelligence::{CostBasisPolicy, QualificationCriteria};
use walletscope::models::{FetchWindow, Side, Timeframe, TradeEvent};

/// End of every test evaluation window.
#[allow(dead_code)]
pub fn run_end() -> DateTime<Utc> {
    Utc.timestamp_opt(1_710_000_000, 0).unwrap()
}

/// One-day window ending at `run_end()`, carry-forward with a week of lookback.
#[allow(dead_code)]
pub fn context(criteria: QualificationCriteria) -> EvaluationContext {
    EvaluationContext::new(criteria, run_end(), CostBasisPolicy::CarryForward, Duration::days(7))
}

#[allow(dead_code)]
pub fn criteria(min_capital: i64, min_holding_secs: i64, min_pnl: i64, min_win_rate: Decimal) -> QualificationCriteria {
    QualificationCriteria::new(
        Decimal::from(min_capital),
        Decimal::from(min_holding_secs),
        Decimal::from(min_pnl),
        min_win_rate,
        Timeframe::OneDay,
    )
    .expect("valid criteria")
}

/// Trade `offset_secs` after the start of the one-day test window.
#[allow(dead_code)]
pub fn trade(
    wallet: &str,
    token: &str,
    side: Side,
    quantity: i64,
    price: Decimal,
    offset_secs: i64,
    tx: &str,
) -> TradeEvent {
    let start = run_end() - Duration::days(1);
    TradeEvent::new(
        wallet,
        token,
        side,
        Decimal::from(quantity),
        price,
        start + Duration::seconds(offset_secs),
        tx,
    )
    .expect("valid trade event")
}

/// In-memory gateway with canned histories and failing wallets.
#[derive(Default)]
#[allow(dead_code)]
pub struct StaticGateway {
    histories: HashMap<String, Vec<TradeEvent>>,
    failing: HashSet<String>,
    marks: HashMap<String, Decimal>,
    broken_marks: HashSet<String>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, wallet: &str, events: Vec<TradeEvent>) -> Self {
        self.histories.insert(wallet.to_string(), events);
        self
    }

    pub fn with_mark(mut self, token: &str, price: Decimal) -> Self {
        self.marks.insert(token.to_string(), price);
        self
    }

    /// Mark lookups for `token` fail with a provider error.
    pub fn broken_mark(mut self, token: &str) -> Self {
        self.broken_marks.insert(token.to_string());
        self
    }

    pub fn failing(mut self, wallet: &str) -> Self {
        self.failing.insert(wallet.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeGateway for StaticGateway {
    async fn fetch_trade_events(
        &self,
        wallet: &str,
        window: &FetchWindow,
    ) -> Result<Vec<TradeEvent>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.failing.contains(wallet) {
            return Err(GatewayError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self
            .histories
            .get(wallet)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| window.contains(e.timestamp()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_price(
        &self,
        token: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, GatewayError> {
        if self.broken_marks.contains(token) {
            return Err(GatewayError::Status {
                status: 500,
                body: "price unavailable".into(),
            });
        }
        Ok(self.marks.get(token).copied())
    }
}
