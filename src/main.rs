use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use walletscope::birdeye::BirdeyeClient;
use walletscope::config::{AppConfig, CriteriaInput};
use walletscope::ingestion::{load_wallets, EvaluationContext};
use walletscope::metrics::init_metrics;
use walletscope::services::{default_output_path, run_batch, write_reports, BatchOptions};

/// Score Solana wallets on realized trading performance and keep the ones
/// that clear every threshold.
#[derive(Parser)]
#[command(name = "walletscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Wallet list; the first column of each row is an address
    #[arg(short, long, default_value = "solana_wallets.csv")]
    wallets: PathBuf,

    /// Results file (default: solana_wallets_results_<unix>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Minimum peak capital deployed, in USD
    #[arg(long, env = "MIN_CAPITAL")]
    min_capital: Option<String>,

    /// Minimum average holding period of closed positions, in seconds
    #[arg(long, env = "MIN_HOLDING_PERIOD_SECS")]
    min_holding_period_secs: Option<String>,

    /// Minimum total realized PnL, in USD
    #[arg(long, env = "MIN_TOTAL_PNL")]
    min_total_pnl: Option<String>,

    /// Minimum fraction of closed positions with positive PnL, 0 to 1
    #[arg(long, env = "MIN_WIN_RATE")]
    min_win_rate: Option<String>,

    /// Evaluation window: 1h, 4h, 1d, 1w or 1m
    #[arg(short, long, env = "TIMEFRAME")]
    timeframe: Option<String>,

    /// Write Prometheus metrics for the run to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Stop at the first gateway failure
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Validate everything before touching the network.
    let criteria = CriteriaInput {
        min_capital: cli.min_capital,
        min_holding_period_secs: cli.min_holding_period_secs,
        min_total_pnl: cli.min_total_pnl,
        min_win_rate: cli.min_win_rate,
        timeframe: cli.timeframe,
    }
    .into_criteria()
    .context("invalid analysis parameters")?;
    let config = AppConfig::from_env().context("invalid configuration")?;

    let metrics_handle = match init_metrics() {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder unavailable");
            None
        }
    };

    let wallets = load_wallets(&cli.wallets).await?;
    if wallets.is_empty() {
        tracing::warn!(path = %cli.wallets.display(), "Wallet list is empty");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing wallets in flight");
                cancel.cancel();
            }
        });
    }

    let evaluated_at = Utc::now();
    let ctx = EvaluationContext::new(criteria, evaluated_at, config.cost_basis_policy, config.lookback());
    let gateway = BirdeyeClient::new(&config, cancel.clone())?;
    let opts = BatchOptions {
        concurrency: config.wallet_concurrency,
        fail_fast: cli.fail_fast || config.fail_fast,
    };

    let summary = run_batch(&gateway, &wallets, &ctx, opts, &cancel).await;

    let output = cli.output.unwrap_or_else(|| default_output_path(evaluated_at));
    write_reports(&summary, &output, evaluated_at).await?;

    if let (Some(path), Some(handle)) = (cli.metrics_out.as_ref(), metrics_handle.as_ref()) {
        tokio::fs::write(path, handle.render())
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Metrics written");
    }

    if summary.aborted {
        tracing::error!(
            not_evaluated = summary.counts.not_evaluated,
            "Run aborted before all wallets were evaluated"
        );
        return Ok(ExitCode::FAILURE);
    }
    if summary.all_gateway_failed() {
        tracing::error!(
            skipped = summary.counts.skipped,
            "Every wallet failed at the market-data gateway"
        );
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!(
        qualified = summary.counts.qualified,
        total = summary.counts.total,
        output = %output.display(),
        "Run complete"
    );
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
