use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Historical window an analysis run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    /// Thirty days.
    #[serde(rename = "1m")]
    OneMonth,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1w",
            Timeframe::OneMonth => "1m",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::OneHour => 3_600,
            Timeframe::FourHours => 14_400,
            Timeframe::OneDay => 86_400,
            Timeframe::OneWeek => 604_800,
            Timeframe::OneMonth => 2_592_000,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Timeframe::OneHour),
            "4h" => Ok(Timeframe::FourHours),
            "1d" => Ok(Timeframe::OneDay),
            "1w" => Ok(Timeframe::OneWeek),
            "1m" => Ok(Timeframe::OneMonth),
            other => Err(ConfigError::UnknownTimeframe(other.to_string())),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive `[start, end]` window of events visible to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationWindow {
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EvaluationWindow {
    /// The window of length `timeframe` that ends at `end`.
    pub fn ending_at(timeframe: Timeframe, end: DateTime<Utc>) -> Self {
        Self {
            timeframe,
            start: end
                .checked_sub_signed(timeframe.duration())
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Range of history requested from the market-data gateway.
///
/// Wider than the evaluation window when earlier acquisitions are needed to
/// establish the cost basis of positions already open at the window start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// The start clamps to the earliest representable instant.
    pub fn new(window: &EvaluationWindow, lookback: Duration) -> Self {
        Self {
            start: window
                .start
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: window.end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}
