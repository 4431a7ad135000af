use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Side;

/// Every Birdeye response is wrapped as `{"success": bool, "data": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
}

// ---------------------------------------------------------------------------
// Wallet transaction list (/v1/wallet/tx_list)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiTxList {
    #[serde(default)]
    pub solana: Vec<ApiTransaction>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTransaction {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub block_time: Option<String>,
    #[serde(default)]
    pub main_action: Option<String>,
    #[serde(default)]
    pub balance_change: Vec<ApiBalanceChange>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiBalanceChange {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Raw integer amount; negative when the wallet's balance decreased.
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub decimals: Option<u32>,
}

impl ApiBalanceChange {
    /// Amount scaled by the token's decimals.
    pub fn ui_amount(&self) -> Option<Decimal> {
        let amount = self.amount?;
        let decimals = self.decimals?;
        if decimals > 28 {
            return None;
        }
        Some(amount * Decimal::new(1, decimals))
    }
}

/// The token leg of a two-sided swap, before it is priced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapLeg {
    pub tx_hash: String,
    pub token: String,
    pub side: Side,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl ApiTransaction {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_block_time(self.block_time.as_deref()?)
    }

    /// A plain swap is reported with `mainAction == "unknown"` and exactly two
    /// balance changes: the quote leg first, the traded token second.
    pub fn swap_leg(&self) -> Option<SwapLeg> {
        if self.main_action.as_deref() != Some("unknown") || self.balance_change.len() != 2 {
            return None;
        }

        let token_leg = &self.balance_change[1];
        let token = token_leg.address.clone().filter(|a| !a.is_empty())?;
        let amount = token_leg.ui_amount()?;
        let side = if amount > Decimal::ZERO {
            Side::Buy
        } else if amount < Decimal::ZERO {
            Side::Sell
        } else {
            return None;
        };

        Some(SwapLeg {
            tx_hash: self.tx_hash.clone().filter(|h| !h.is_empty())?,
            token,
            side,
            quantity: amount.abs(),
            timestamp: self.timestamp()?,
        })
    }
}

fn parse_block_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Historical price (/defi/historical_price_unix)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHistoricalPrice {
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub update_unix_time: Option<i64>,
}
