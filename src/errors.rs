use rust_decimal::Decimal;
use thiserror::Error;

/// Invalid or missing run configuration. Fatal: raised before any wallet is processed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required value: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },

    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: Decimal },

    #[error("min win rate must be a fraction in [0, 1], got {0}")]
    WinRateOutOfRange(Decimal),

    #[error("unknown timeframe {0:?} (expected one of 1h, 4h, 1d, 1w, 1m)")]
    UnknownTimeframe(String),
}

/// Market-data provider failure. Scoped to the wallet being fetched.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("unauthorized: check BIRDEYE_API_KEY")]
    Unauthorized,

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GatewayError::Status { status, .. } => *status >= 500,
            GatewayError::RateLimited => true,
            GatewayError::Unauthorized
            | GatewayError::Unexpected(_)
            | GatewayError::Cancelled => false,
        }
    }
}

/// Replay of a wallet's events violated the non-negative holdings invariant
/// or produced an amount outside the decimal range.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error(
        "data inconsistency: tx {tx_id} sells {quantity} of {token} but only {held} is held"
    )]
    Oversell {
        tx_id: String,
        token: String,
        quantity: Decimal,
        held: Decimal,
    },

    #[error("amount overflow replaying tx {tx_id} of {token}")]
    Overflow { tx_id: String, token: String },

    #[error("event {tx_id} belongs to wallet {found}, expected {expected}")]
    WalletMismatch {
        tx_id: String,
        expected: String,
        found: String,
    },
}

/// A raw record could not be turned into a `TradeEvent`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("empty {0}")]
    Empty(&'static str),

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },
}
