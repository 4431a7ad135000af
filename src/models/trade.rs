use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use super::Side;
use crate::errors::EventError;

/// One on-chain swap affecting a wallet's holding of a token.
///
/// Fields are private so every instance has passed [`TradeEvent::new`]:
/// non-empty identifiers, strictly positive quantity and price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeEvent {
    wallet: String,
    token: String,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    timestamp: DateTime<Utc>,
    tx_id: String,
}

impl TradeEvent {
    pub fn new(
        wallet: impl Into<String>,
        token: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        tx_id: impl Into<String>,
    ) -> Result<Self, EventError> {
        let wallet = wallet.into();
        let token = token.into();
        let tx_id = tx_id.into();

        if wallet.trim().is_empty() {
            return Err(EventError::Empty("wallet address"));
        }
        if token.trim().is_empty() {
            return Err(EventError::Empty("token identifier"));
        }
        if tx_id.trim().is_empty() {
            return Err(EventError::Empty("transaction identifier"));
        }
        if quantity <= Decimal::ZERO {
            return Err(EventError::NonPositive {
                field: "quantity",
                value: quantity,
            });
        }
        if price <= Decimal::ZERO {
            return Err(EventError::NonPositive {
                field: "price",
                value: price,
            });
        }

        Ok(Self {
            wallet,
            token,
            side,
            quantity,
            price,
            timestamp,
            tx_id,
        })
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Quote-unit value of the trade (price × quantity); `None` on overflow.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.quantity)
    }

    /// Replay order: timestamp, then transaction id. The remaining fields only
    /// break ties between records sharing a transaction so the order is total.
    pub fn replay_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.tx_id.cmp(&other.tx_id))
            .then_with(|| self.token.cmp(&other.token))
            .then_with(|| self.side.cmp(&other.side))
            .then_with(|| self.quantity.cmp(&other.quantity))
            .then_with(|| self.price.cmp(&other.price))
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade: wallet={} token={} side={} qty={} price={} tx={}",
            short(&self.wallet),
            short(&self.token),
            self.side,
            self.quantity,
            self.price,
            self.tx_id,
        )
    }
}

fn short(id: &str) -> String {
    id.chars().take(8).collect()
}
