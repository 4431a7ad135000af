use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const WALLETS_EVALUATED: &str = "wallets_evaluated_total";
pub const WALLETS_QUALIFIED: &str = "wallets_qualified_total";
pub const WALLETS_SKIPPED: &str = "wallets_skipped_total";
pub const WALLETS_EXCLUDED: &str = "wallets_excluded_total";
pub const GATEWAY_REQUESTS: &str = "gateway_requests_total";
pub const GATEWAY_FAILURES: &str = "gateway_request_failures_total";
pub const TRADE_EVENTS_REJECTED: &str = "trade_events_rejected_total";
pub const WALLET_EVALUATION_SECONDS: &str = "wallet_evaluation_seconds";

/// Install the Prometheus recorder and register all run metrics.
/// The returned handle's `render()` produces the text exposition format,
/// written out at the end of a run.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // Pre-register counters so they appear even when nothing was counted.
    for name in [
        WALLETS_EVALUATED,
        WALLETS_QUALIFIED,
        WALLETS_SKIPPED,
        WALLETS_EXCLUDED,
        GATEWAY_REQUESTS,
        GATEWAY_FAILURES,
        TRADE_EVENTS_REJECTED,
    ] {
        counter!(name).absolute(0);
    }

    // Histogram is lazily created on first record; force creation.
    histogram!(WALLET_EVALUATION_SECONDS).record(0.0);

    Ok(handle)
}
