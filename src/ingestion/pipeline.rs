use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use std::time::Instant;

use crate::errors::{GatewayError, PositionError};
use crate::ingestion::gateway::TradeGateway;
use crate::intelligence::{
    qualify, reconstruct_positions, score_wallet, CostBasisPolicy, CriterionFailure, MarkPrices,
    QualificationCriteria, ReconstructedPositions,
};
use crate::metrics::{
    WALLETS_EVALUATED, WALLETS_EXCLUDED, WALLETS_QUALIFIED, WALLETS_SKIPPED,
    WALLET_EVALUATION_SECONDS,
};
use crate::models::{EvaluationWindow, FetchWindow, TradeEvent, WalletMetrics};

/// Everything a single wallet evaluation needs. Shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub criteria: QualificationCriteria,
    pub window: EvaluationWindow,
    pub fetch_window: FetchWindow,
    pub policy: CostBasisPolicy,
}

impl EvaluationContext {
    /// Window of the criteria's timeframe ending at `end`. `lookback` widens the
    /// fetch range under the carry-forward policy and is ignored otherwise.
    pub fn new(
        criteria: QualificationCriteria,
        end: DateTime<Utc>,
        policy: CostBasisPolicy,
        lookback: Duration,
    ) -> Self {
        let window = EvaluationWindow::ending_at(criteria.timeframe(), end);
        let lookback = match policy {
            CostBasisPolicy::CarryForward => lookback,
            CostBasisPolicy::WindowOnly => Duration::zero(),
        };
        Self {
            criteria,
            window,
            fetch_window: FetchWindow::new(&window, lookback),
            policy,
        }
    }
}

/// Result of evaluating one wallet. Failures are scoped to the wallet.
#[derive(Debug)]
pub enum WalletOutcome {
    Qualified(WalletMetrics),
    Rejected {
        metrics: WalletMetrics,
        failures: Vec<CriterionFailure>,
    },
    /// History violated a replay invariant; the wallet was not scored.
    Excluded(PositionError),
    /// The gateway could not supply the wallet's history.
    Skipped(GatewayError),
}

impl WalletOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WalletOutcome::Qualified(_) => "qualified",
            WalletOutcome::Rejected { .. } => "rejected",
            WalletOutcome::Excluded(_) => "excluded",
            WalletOutcome::Skipped(_) => "skipped",
        }
    }

    pub fn metrics(&self) -> Option<&WalletMetrics> {
        match self {
            WalletOutcome::Qualified(m) | WalletOutcome::Rejected { metrics: m, .. } => Some(m),
            WalletOutcome::Excluded(_) | WalletOutcome::Skipped(_) => None,
        }
    }

    /// Human readable explanation for the diagnostics report.
    pub fn reason(&self) -> String {
        match self {
            WalletOutcome::Qualified(_) => String::new(),
            WalletOutcome::Rejected { failures, .. } => failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
            WalletOutcome::Excluded(e) => e.to_string(),
            WalletOutcome::Skipped(e) => e.to_string(),
        }
    }

    pub fn is_qualified(&self) -> bool {
        matches!(self, WalletOutcome::Qualified(_))
    }
}

/// Reconstruct, score and qualify an already fetched history, leaving open
/// positions unmarked.
pub fn evaluate_events(wallet: &str, events: &[TradeEvent], ctx: &EvaluationContext) -> WalletOutcome {
    match reconstruct(wallet, events, ctx) {
        Ok(positions) => judge(wallet, &positions, &MarkPrices::new(), ctx),
        Err(e) => WalletOutcome::Excluded(e),
    }
}

fn reconstruct(
    wallet: &str,
    events: &[TradeEvent],
    ctx: &EvaluationContext,
) -> Result<ReconstructedPositions, PositionError> {
    let positions = reconstruct_positions(wallet, events, &ctx.window, ctx.policy)?;
    if positions.is_empty() {
        tracing::debug!(wallet = %wallet, "No positions intersect the window");
    }
    Ok(positions)
}

fn judge(
    wallet: &str,
    positions: &ReconstructedPositions,
    marks: &MarkPrices,
    ctx: &EvaluationContext,
) -> WalletOutcome {
    let metrics = score_wallet(wallet, positions, &ctx.window, marks);
    let outcome = qualify(metrics, &ctx.criteria);

    if outcome.qualified {
        WalletOutcome::Qualified(outcome.metrics)
    } else {
        WalletOutcome::Rejected {
            metrics: outcome.metrics,
            failures: outcome.failures,
        }
    }
}

/// Fetch one wallet's history, mark its open positions at the window end and
/// evaluate it.
pub async fn evaluate_wallet<G: TradeGateway + ?Sized>(
    gateway: &G,
    wallet: &str,
    ctx: &EvaluationContext,
) -> WalletOutcome {
    let start = Instant::now();
    let outcome = fetch_and_evaluate(gateway, wallet, ctx).await;
    histogram!(WALLET_EVALUATION_SECONDS).record(start.elapsed().as_secs_f64());
    log_outcome(wallet, &outcome);
    outcome
}

async fn fetch_and_evaluate<G: TradeGateway + ?Sized>(
    gateway: &G,
    wallet: &str,
    ctx: &EvaluationContext,
) -> WalletOutcome {
    let events = match gateway.fetch_trade_events(wallet, &ctx.fetch_window).await {
        Ok(events) => events,
        Err(e) => return WalletOutcome::Skipped(e),
    };
    tracing::debug!(wallet = %wallet, events = events.len(), "Evaluating wallet");

    let positions = match reconstruct(wallet, &events, ctx) {
        Ok(p) => p,
        Err(e) => return WalletOutcome::Excluded(e),
    };
    let marks = match mark_open_positions(gateway, wallet, &positions, ctx.window.end).await {
        Ok(m) => m,
        Err(e) => return WalletOutcome::Skipped(e),
    };
    judge(wallet, &positions, &marks, ctx)
}

/// Price every open token at `at`. A failed lookup leaves the token unmarked;
/// only cancellation aborts.
async fn mark_open_positions<G: TradeGateway + ?Sized>(
    gateway: &G,
    wallet: &str,
    positions: &ReconstructedPositions,
    at: DateTime<Utc>,
) -> Result<MarkPrices, GatewayError> {
    let mut marks = MarkPrices::new();
    for position in &positions.open {
        if marks.contains_key(&position.token) {
            continue;
        }
        match gateway.mark_price(&position.token, at).await {
            Ok(Some(price)) => {
                marks.insert(position.token.clone(), price);
            }
            Ok(None) => {
                tracing::debug!(wallet = %wallet, token = %position.token, "No mark price for open position");
            }
            Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    wallet = %wallet,
                    token = %position.token,
                    error = %e,
                    "Mark price lookup failed, leaving position unmarked"
                );
            }
        }
    }
    Ok(marks)
}

fn log_outcome(wallet: &str, outcome: &WalletOutcome) {
    match outcome {
        WalletOutcome::Qualified(m) => {
            counter!(WALLETS_EVALUATED).increment(1);
            counter!(WALLETS_QUALIFIED).increment(1);
            tracing::info!(
                wallet = %wallet,
                pnl = %m.total_pnl,
                unrealized = %m.unrealized_pnl,
                win_rate = %m.win_rate,
                holding_secs = %m.avg_holding_period_secs,
                capital = %m.capital_deployed,
                "Wallet qualified"
            );
        }
        WalletOutcome::Rejected { metrics, .. } => {
            counter!(WALLETS_EVALUATED).increment(1);
            tracing::debug!(
                wallet = %wallet,
                pnl = %metrics.total_pnl,
                closed = metrics.closed_positions,
                reason = %outcome.reason(),
                "Wallet rejected"
            );
        }
        WalletOutcome::Excluded(e) => {
            counter!(WALLETS_EXCLUDED).increment(1);
            tracing::warn!(wallet = %wallet, error = %e, "Wallet excluded: inconsistent trade history");
        }
        WalletOutcome::Skipped(GatewayError::Cancelled) => {
            tracing::debug!(wallet = %wallet, "Wallet fetch cancelled");
        }
        WalletOutcome::Skipped(e) => {
            counter!(WALLETS_SKIPPED).increment(1);
            tracing::warn!(wallet = %wallet, error = %e, "Wallet skipped: gateway failure");
        }
    }
}
