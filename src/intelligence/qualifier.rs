use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::{Timeframe, WalletMetrics};

/// Thresholds a wallet must meet. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationCriteria {
    min_capital: Decimal,
    min_holding_period_secs: Decimal,
    min_total_pnl: Decimal,
    min_win_rate: Decimal,
    timeframe: Timeframe,
}

impl QualificationCriteria {
    /// Validates every minimum is non-negative and the win rate is a fraction.
    pub fn new(
        min_capital: Decimal,
        min_holding_period_secs: Decimal,
        min_total_pnl: Decimal,
        min_win_rate: Decimal,
        timeframe: Timeframe,
    ) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("min capital", min_capital),
            ("min holding period", min_holding_period_secs),
            ("min total PnL", min_total_pnl),
            ("min win rate", min_win_rate),
        ] {
            if value < Decimal::ZERO {
                return Err(ConfigError::Negative { field, value });
            }
        }
        if min_win_rate > Decimal::ONE {
            return Err(ConfigError::WinRateOutOfRange(min_win_rate));
        }

        Ok(Self {
            min_capital,
            min_holding_period_secs,
            min_total_pnl,
            min_win_rate,
            timeframe,
        })
    }

    pub fn min_capital(&self) -> Decimal {
        self.min_capital
    }

    pub fn min_holding_period_secs(&self) -> Decimal {
        self.min_holding_period_secs
    }

    pub fn min_total_pnl(&self) -> Decimal {
        self.min_total_pnl
    }

    pub fn min_win_rate(&self) -> Decimal {
        self.min_win_rate
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

/// One threshold a wallet fell short of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "criterion", rename_all = "snake_case")]
pub enum CriterionFailure {
    Capital { actual: Decimal, required: Decimal },
    HoldingPeriod { actual: Decimal, required: Decimal },
    TotalPnl { actual: Decimal, required: Decimal },
    /// `no_closed_positions` marks a win rate that is zero only because
    /// nothing closed, as opposed to a wallet that closed only losers.
    WinRate {
        actual: Decimal,
        required: Decimal,
        no_closed_positions: bool,
    },
}

impl fmt::Display for CriterionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionFailure::Capital { actual, required } => {
                write!(f, "capital deployed {actual} < {required}")
            }
            CriterionFailure::HoldingPeriod { actual, required } => {
                write!(f, "avg holding period {actual}s < {required}s")
            }
            CriterionFailure::TotalPnl { actual, required } => {
                write!(f, "total PnL {actual} < {required}")
            }
            CriterionFailure::WinRate {
                actual,
                required,
                no_closed_positions,
            } => {
                write!(f, "win rate {actual} < {required}")?;
                if *no_closed_positions {
                    write!(f, " (no closed positions, win rate reported as 0)")?;
                }
                Ok(())
            }
        }
    }
}

/// Decision plus the metrics it was based on. Metrics are kept on rejection
/// too so they can be exported as diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationOutcome {
    pub qualified: bool,
    pub metrics: WalletMetrics,
    pub failures: Vec<CriterionFailure>,
}

impl QualificationOutcome {
    /// All failure reasons joined for a single diagnostics cell.
    pub fn reason(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// All four thresholds are independent necessary conditions.
pub fn qualify(metrics: WalletMetrics, criteria: &QualificationCriteria) -> QualificationOutcome {
    let mut failures = Vec::new();

    if metrics.capital_deployed < criteria.min_capital {
        failures.push(CriterionFailure::Capital {
            actual: metrics.capital_deployed,
            required: criteria.min_capital,
        });
    }
    if metrics.avg_holding_period_secs < criteria.min_holding_period_secs {
        failures.push(CriterionFailure::HoldingPeriod {
            actual: metrics.avg_holding_period_secs,
            required: criteria.min_holding_period_secs,
        });
    }
    if metrics.total_pnl < criteria.min_total_pnl {
        failures.push(CriterionFailure::TotalPnl {
            actual: metrics.total_pnl,
            required: criteria.min_total_pnl,
        });
    }
    if metrics.win_rate < criteria.min_win_rate {
        failures.push(CriterionFailure::WinRate {
            actual: metrics.win_rate,
            required: criteria.min_win_rate,
            no_closed_positions: !metrics.has_closed_positions(),
        });
    }

    QualificationOutcome {
        qualified: failures.is_empty(),
        metrics,
        failures,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
