use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::GatewayError;
use crate::ingestion::gateway::TradeGateway;
use crate::ingestion::pipeline::{evaluate_wallet, EvaluationContext, WalletOutcome};
use crate::models::WalletMetrics;

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Wallets evaluated at the same time.
    pub concurrency: usize,
    /// Stop starting new wallets after the first gateway failure.
    pub fail_fast: bool,
}

/// Per-wallet line of the diagnostics report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub wallet: String,
    pub outcome: &'static str,
    pub reason: String,
    pub metrics: Option<WalletMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub total: usize,
    pub qualified: usize,
    pub rejected: usize,
    pub excluded: usize,
    pub skipped: usize,
    pub not_evaluated: usize,
}

/// Everything collected over one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub qualified: Vec<WalletMetrics>,
    /// Every wallet that did not qualify, in input order.
    pub diagnostics: Vec<Diagnostic>,
    pub counts: RunCounts,
    /// Cancelled by fail-fast or an interrupt before the batch completed.
    pub aborted: bool,
}

impl RunSummary {
    /// At least one wallet was attempted and every attempt failed at the gateway.
    pub fn all_gateway_failed(&self) -> bool {
        let attempted = self.counts.total - self.counts.not_evaluated;
        attempted > 0 && self.counts.skipped == attempted
    }

    fn record(&mut self, wallet: &str, outcome: WalletOutcome) -> Option<Diagnostic> {
        match outcome {
            WalletOutcome::Qualified(metrics) => {
                self.counts.qualified += 1;
                self.qualified.push(metrics);
                None
            }
            other => {
                match other {
                    WalletOutcome::Rejected { .. } => self.counts.rejected += 1,
                    WalletOutcome::Excluded(_) => self.counts.excluded += 1,
                    WalletOutcome::Skipped(_) => self.counts.skipped += 1,
                    WalletOutcome::Qualified(_) => {}
                }
                Some(Diagnostic {
                    wallet: wallet.to_string(),
                    outcome: other.label(),
                    reason: other.reason(),
                    metrics: other.metrics().cloned(),
                })
            }
        }
    }

    fn not_evaluated(&mut self, wallet: &str) -> Diagnostic {
        self.counts.not_evaluated += 1;
        Diagnostic {
            wallet: wallet.to_string(),
            outcome: "not_evaluated",
            reason: "run cancelled before this wallet was processed".into(),
            metrics: None,
        }
    }
}

/// Evaluate `wallets` with at most `opts.concurrency` in flight.
///
/// Workers only produce outcomes; this function is the single collector.
/// Once `cancel` fires, wallets not yet started are reported as not
/// evaluated and wallets in flight are allowed to finish.
pub async fn run_batch<G: TradeGateway + ?Sized>(
    gateway: &G,
    wallets: &[String],
    ctx: &EvaluationContext,
    opts: BatchOptions,
    cancel: &CancellationToken,
) -> RunSummary {
    tracing::info!(
        wallets = wallets.len(),
        concurrency = opts.concurrency,
        fail_fast = opts.fail_fast,
        timeframe = %ctx.window.timeframe,
        window_start = %ctx.window.start,
        window_end = %ctx.window.end,
        policy = %ctx.policy,
        "Batch started"
    );

    let mut summary = RunSummary {
        counts: RunCounts {
            total: wallets.len(),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut diagnostics: Vec<(usize, Diagnostic)> = Vec::new();

    let mut results = stream::iter(wallets.iter().enumerate())
        .map(move |(idx, wallet)| async move {
            if cancel.is_cancelled() {
                return (idx, wallet, None);
            }
            let outcome = evaluate_wallet(gateway, wallet, ctx).await;
            (idx, wallet, Some(outcome))
        })
        .buffer_unordered(opts.concurrency.max(1));

    while let Some((idx, wallet, outcome)) = results.next().await {
        let outcome = match outcome {
            None | Some(WalletOutcome::Skipped(GatewayError::Cancelled)) => {
                diagnostics.push((idx, summary.not_evaluated(wallet)));
                continue;
            }
            Some(outcome) => outcome,
        };

        if opts.fail_fast && matches!(outcome, WalletOutcome::Skipped(_)) && !cancel.is_cancelled() {
            tracing::error!(wallet = %wallet, "Gateway failure with fail-fast set, stopping run");
            cancel.cancel();
        }

        if let Some(diag) = summary.record(wallet, outcome) {
            diagnostics.push((idx, diag));
        }
    }

    diagnostics.sort_by_key(|(idx, _)| *idx);
    summary.diagnostics = diagnostics.into_iter().map(|(_, d)| d).collect();
    summary.aborted = cancel.is_cancelled();

    let c = summary.counts;
    tracing::info!(
        total = c.total,
        qualified = c.qualified,
        rejected = c.rejected,
        excluded = c.excluded,
        skipped = c.skipped,
        not_evaluated = c.not_evaluated,
        aborted = summary.aborted,
        "Batch finished"
    );

    summary
}
