use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use crate::models::WalletMetrics;
use crate::services::batch_runner::{Diagnostic, RunSummary};

pub const RESULTS_HEADER: &str = "wallet,total_pnl_usd,win_rate,average_holding_period_seconds,capital_deployed_usd,timeframe,evaluated_at";
pub const DIAGNOSTICS_HEADER: &str = "wallet,outcome,reason,total_pnl_usd,unrealized_pnl_usd,win_rate,average_holding_period_seconds,capital_deployed_usd,closed_positions,open_positions";

/// `solana_wallets_results_<unix>.csv` in the working directory.
pub fn default_output_path(now: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!("solana_wallets_results_{}.csv", now.timestamp()))
}

/// `<stem>_diagnostics.csv` next to the results file.
pub fn diagnostics_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".into());
    output.with_file_name(format!("{stem}_diagnostics.csv"))
}

/// Qualified wallets by total PnL descending, ties broken by address.
pub fn render_results(qualified: &[WalletMetrics], evaluated_at: DateTime<Utc>) -> String {
    let mut rows: Vec<&WalletMetrics> = qualified.iter().collect();
    rows.sort_by(|a, b| b.total_pnl.cmp(&a.total_pnl).then_with(|| a.wallet.cmp(&b.wallet)));

    let stamp = evaluated_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(RESULTS_HEADER);
    out.push('\n');

    for m in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_field(&m.wallet),
            usd(m.total_pnl),
            ratio(m.win_rate),
            seconds(m.avg_holding_period_secs),
            usd(m.capital_deployed),
            m.timeframe(),
            stamp,
        ));
    }
    out
}

pub fn render_diagnostics(rows: &[Diagnostic]) -> String {
    let mut out = String::new();
    out.push_str(DIAGNOSTICS_HEADER);
    out.push('\n');

    for d in rows {
        let metrics = match &d.metrics {
            Some(m) => format!(
                "{},{},{},{},{},{},{}",
                usd(m.total_pnl),
                usd(m.unrealized_pnl),
                ratio(m.win_rate),
                seconds(m.avg_holding_period_secs),
                usd(m.capital_deployed),
                m.closed_positions,
                m.open_positions,
            ),
            None => ",,,,,,".to_string(),
        };
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&d.wallet),
            d.outcome,
            csv_field(&d.reason),
            metrics
        ));
    }
    out
}

/// Paths the reports were written to.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub results: PathBuf,
    pub diagnostics: PathBuf,
}

/// Write the results file and its diagnostics companion.
pub async fn write_reports(
    summary: &RunSummary,
    output: &Path,
    evaluated_at: DateTime<Utc>,
) -> anyhow::Result<ReportPaths> {
    let diagnostics = diagnostics_path(output);

    write_atomic(output, &render_results(&summary.qualified, evaluated_at)).await?;
    write_atomic(&diagnostics, &render_diagnostics(&summary.diagnostics)).await?;

    tracing::info!(
        path = %output.display(),
        rows = summary.qualified.len(),
        "Results written"
    );
    tracing::info!(
        path = %diagnostics.display(),
        rows = summary.diagnostics.len(),
        "Diagnostics written"
    );

    Ok(ReportPaths {
        results: output.to_path_buf(),
        diagnostics,
    })
}

/// Write to a temporary sibling and rename into place, so readers never
/// observe a partially written file.
pub async fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("output path {} has no file name", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("failed to move report into {}", path.display()));
    }
    Ok(())
}

/// Quote a field when it contains a delimiter, quote or line break.
pub fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn usd(value: Decimal) -> String {
    value.round_dp(6).normalize().to_string()
}

fn ratio(value: Decimal) -> String {
    value.round_dp(4).normalize().to_string()
}

fn seconds(value: Decimal) -> String {
    value.round_dp(2).normalize().to_string()
}
