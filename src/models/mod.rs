pub mod position;
pub mod trade;
pub mod wallet;
pub mod window;

pub use position::{ExposurePoint, Position, PositionStatus};
pub use trade::TradeEvent;
pub use wallet::WalletMetrics;
pub use window::{EvaluationWindow, FetchWindow, Timeframe};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}
