use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;

/// Extract wallet addresses from the contents of a wallet list file.
///
/// The first comma separated column of each non-empty row is taken. A header
/// row named `wallet` or `address` is skipped and repeated addresses keep only
/// their first occurrence.
pub fn parse_wallet_list(contents: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut wallets = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let first = line.split(',').next().unwrap_or_default();
        let wallet = first.trim().trim_matches('"').trim();
        if wallet.is_empty() {
            continue;
        }
        if idx == 0 && matches!(wallet.to_ascii_lowercase().as_str(), "wallet" | "address") {
            continue;
        }
        if seen.insert(wallet.to_string()) {
            wallets.push(wallet.to_string());
        } else {
            tracing::debug!(wallet = %wallet, "Duplicate wallet in list ignored");
        }
    }

    wallets
}

/// Read and parse the wallet list at `path`.
pub async fn load_wallets(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read wallet list {}", path.display()))?;
    let wallets = parse_wallet_list(&contents);

    tracing::info!(path = %path.display(), count = wallets.len(), "Wallet list loaded");
    Ok(wallets)
}
