use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::EvaluationWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost basis still committed to a position right after one of its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposurePoint {
    pub at: DateTime<Utc>,
    pub tx_id: String,
    pub open_cost: Decimal,
}

/// One trading episode of a wallet in one token: from the buy that lifts the
/// held quantity above zero to the sell that brings it back to exactly zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub token: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub quantity_acquired: Decimal,
    pub quantity_disposed: Decimal,
    /// Sum of price × quantity over all acquisitions.
    pub cost_basis: Decimal,
    /// Sum of price × quantity over all disposals.
    pub proceeds: Decimal,
    /// Proceeds minus the weighted-average cost of the disposed quantity.
    pub realized_pnl: Decimal,
    pub status: PositionStatus,
    /// Remaining cost basis after every event, in replay order.
    pub exposure: Vec<ExposurePoint>,
}

impl Position {
    pub fn held_quantity(&self) -> Decimal {
        self.quantity_acquired - self.quantity_disposed
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Seconds between opening and closing; `None` while open.
    pub fn holding_period_secs(&self) -> Option<Decimal> {
        self.closed_at
            .map(|closed| Decimal::from((closed - self.opened_at).num_seconds()))
    }

    /// Cost basis still committed after the last replayed event.
    pub fn remaining_cost(&self) -> Decimal {
        self.exposure
            .last()
            .map(|p| p.open_cost)
            .unwrap_or(Decimal::ZERO)
    }

    /// Cost basis still committed strictly before `at`.
    pub fn open_cost_before(&self, at: DateTime<Utc>) -> Decimal {
        self.exposure
            .iter()
            .take_while(|p| p.at < at)
            .last()
            .map(|p| p.open_cost)
            .unwrap_or(Decimal::ZERO)
    }

    /// Whether any part of the position's life falls inside `window`.
    pub fn intersects(&self, window: &EvaluationWindow) -> bool {
        if self.opened_at > window.end {
            return false;
        }
        match self.closed_at {
            Some(closed) => closed >= window.start,
            None => true,
        }
    }
}
