use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::GatewayError;
use crate::models::{FetchWindow, TradeEvent};

/// Source of a wallet's historical trades.
///
/// Implementations validate raw provider records at this boundary: every
/// returned `TradeEvent` is well formed and belongs to `wallet`.
#[async_trait]
pub trait TradeGateway: Send + Sync {
    async fn fetch_trade_events(
        &self,
        wallet: &str,
        window: &FetchWindow,
    ) -> Result<Vec<TradeEvent>, GatewayError>;

    /// USD price of `token` at `at`, used to mark open positions.
    /// `None` when the source has no price.
    async fn mark_price(
        &self,
        _token: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, GatewayError> {
        Ok(None)
    }
}

#[async_trait]
impl<G: TradeGateway + ?Sized> TradeGateway for Arc<G> {
    async fn fetch_trade_events(
        &self,
        wallet: &str,
        window: &FetchWindow,
    ) -> Result<Vec<TradeEvent>, GatewayError> {
        (**self).fetch_trade_events(wallet, window).await
    }

    async fn mark_price(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, GatewayError> {
        (**self).mark_price(token, at).await
    }
}
