use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{EvaluationWindow, Timeframe};

/// Wallet-level aggregate derived from its positions. Recomputed on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletMetrics {
    pub wallet: String,
    /// Sum of realized PnL over closed positions, in quote units.
    pub total_pnl: Decimal,
    /// Open holdings at the window-end mark minus their remaining cost. Reported, not qualified on.
    pub unrealized_pnl: Decimal,
    /// Fraction of closed positions with strictly positive PnL; zero when none closed.
    pub win_rate: Decimal,
    /// Mean seconds from open to close over closed positions; zero when none closed.
    pub avg_holding_period_secs: Decimal,
    /// High-water mark of the summed cost basis of simultaneously open positions.
    pub capital_deployed: Decimal,
    pub window: EvaluationWindow,
    pub closed_positions: usize,
    pub open_positions: usize,
    pub winning_positions: usize,
}

impl WalletMetrics {
    /// Metrics of a wallet with nothing to show in the window.
    pub fn empty(wallet: impl Into<String>, window: EvaluationWindow) -> Self {
        Self {
            wallet: wallet.into(),
            total_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            win_rate: Decimal::ZERO,
            avg_holding_period_secs: Decimal::ZERO,
            capital_deployed: Decimal::ZERO,
            window,
            closed_positions: 0,
            open_positions: 0,
            winning_positions: 0,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.window.timeframe
    }

    pub fn has_closed_positions(&self) -> bool {
        self.closed_positions > 0
    }
}
