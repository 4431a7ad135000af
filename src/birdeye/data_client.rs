use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::throttle::RequestThrottle;
use super::types::{ApiEnvelope, ApiHistoricalPrice, ApiTxList, SwapLeg};
use crate::config::AppConfig;
use crate::errors::GatewayError;
use crate::ingestion::gateway::TradeGateway;
use crate::metrics::{GATEWAY_FAILURES, GATEWAY_REQUESTS, TRADE_EVENTS_REJECTED};
use crate::models::{FetchWindow, TradeEvent};

/// Page size of the wallet transaction list endpoint.
pub const TX_PAGE_LIMIT: usize = 1000;

/// Retry configuration for provider calls.
pub fn get_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(Duration::from_secs(60)),
        multiplier: 2.0,
        randomization_factor: 0.1,
        ..Default::default()
    }
}

/// Birdeye public API client for Solana wallet history and historical prices.
pub struct BirdeyeClient {
    http: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
    throttle: RequestThrottle,
    cancel: CancellationToken,
    /// (token, unix seconds) → USD price, for this run only.
    price_cache: Mutex<HashMap<(String, i64), Option<Decimal>>>,
}

impl BirdeyeClient {
    pub fn new(config: &AppConfig, cancel: CancellationToken) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(config.gateway_timeout).build()?;

        Ok(Self {
            http,
            base_url: config.birdeye_base_url.trim_end_matches('/').to_string(),
            api_key: config.birdeye_api_key.clone(),
            timeout: config.gateway_timeout,
            max_retries: config.gateway_max_retries,
            throttle: RequestThrottle::new(
                config.gateway_max_concurrency,
                config.gateway_requests_per_second,
            ),
            cancel,
            price_cache: Mutex::new(HashMap::new()),
        })
    }

    /// One page of a wallet's transactions, newest first, older than `before`.
    pub async fn get_tx_page(
        &self,
        wallet: &str,
        before: Option<&str>,
    ) -> Result<ApiTxList, GatewayError> {
        let mut query = vec![
            ("wallet", wallet.to_string()),
            ("limit", TX_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = before {
            query.push(("before", cursor.to_string()));
        }

        let envelope: ApiEnvelope<ApiTxList> = self.get_json("/v1/wallet/tx_list", &query).await?;
        if !envelope.success {
            return Err(GatewayError::Unexpected(format!(
                "tx_list for {wallet} returned success=false"
            )));
        }
        Ok(envelope.data.unwrap_or_default())
    }

    /// USD price of `token` at `unix_time`; `None` when the provider has none.
    pub async fn get_historical_price(
        &self,
        token: &str,
        unix_time: i64,
    ) -> Result<Option<Decimal>, GatewayError> {
        let key = (token.to_string(), unix_time);
        if let Some(cached) = self.price_cache.lock().await.get(&key) {
            return Ok(*cached);
        }

        let query = [
            ("address", token.to_string()),
            ("unixtime", unix_time.to_string()),
        ];
        let envelope: ApiEnvelope<ApiHistoricalPrice> =
            self.get_json("/defi/historical_price_unix", &query).await?;
        let price = if envelope.success {
            envelope.data.and_then(|d| d.value)
        } else {
            None
        };

        self.price_cache.lock().await.insert(key, price);
        Ok(price)
    }

    /// Throttled GET with exponential backoff on transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let this = self;

        backoff::future::retry(get_backoff(), move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match this.send_once(path, query).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    counter!(GATEWAY_FAILURES).increment(1);
                    if e.is_transient() && attempt <= this.max_retries {
                        tracing::warn!(
                            error = %e,
                            attempt = attempt,
                            max_retries = this.max_retries,
                            "Birdeye request failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    } else {
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        })
        .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        if self.cancel.is_cancelled() {
            // Wake every request still queued on the throttle.
            self.throttle.close();
            return Err(GatewayError::Cancelled);
        }
        let _permit = self.throttle.acquire().await?;
        if self.cancel.is_cancelled() {
            self.throttle.close();
            return Err(GatewayError::Cancelled);
        }

        counter!(GATEWAY_REQUESTS).increment(1);
        tracing::debug!(path = %path, query = ?query, "Birdeye GET");

        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .header("accept", "application/json")
            .header("x-chain", "solana")
            .header("X-API-KEY", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Unexpected(format!("failed to parse Birdeye response: {e}")))
    }

    /// Walk the transaction list backwards until the fetch window start.
    async fn collect_swaps(
        &self,
        wallet: &str,
        window: &FetchWindow,
    ) -> Result<Vec<SwapLeg>, GatewayError> {
        let mut swaps = Vec::new();
        let mut before: Option<String> = None;

        'pages: loop {
            let page = self.get_tx_page(wallet, before.as_deref()).await?.solana;
            let page_len = page.len();
            before = page.last().and_then(|tx| tx.tx_hash.clone());

            for tx in &page {
                let Some(at) = tx.timestamp() else {
                    tracing::debug!(wallet = %wallet, tx = ?tx.tx_hash, "Transaction without block time");
                    continue;
                };
                if at < window.start {
                    break 'pages;
                }
                if at > window.end {
                    continue;
                }
                if let Some(leg) = tx.swap_leg() {
                    swaps.push(leg);
                }
            }

            if page_len < TX_PAGE_LIMIT || before.is_none() {
                break;
            }
        }

        Ok(swaps)
    }
}

#[async_trait]
impl TradeGateway for BirdeyeClient {
    async fn fetch_trade_events(
        &self,
        wallet: &str,
        window: &FetchWindow,
    ) -> Result<Vec<TradeEvent>, GatewayError> {
        let swaps = self.collect_swaps(wallet, window).await?;
        let mut events = Vec::with_capacity(swaps.len());

        for leg in swaps {
            let price = self
                .get_historical_price(&leg.token, leg.timestamp.timestamp())
                .await?;
            let Some(price) = price else {
                counter!(TRADE_EVENTS_REJECTED).increment(1);
                tracing::warn!(
                    wallet = %wallet,
                    token = %leg.token,
                    tx = %leg.tx_hash,
                    "No historical price, dropping trade"
                );
                continue;
            };

            match TradeEvent::new(
                wallet,
                leg.token,
                leg.side,
                leg.quantity,
                price,
                leg.timestamp,
                leg.tx_hash,
            ) {
                Ok(event) => events.push(event),
                Err(e) => {
                    counter!(TRADE_EVENTS_REJECTED).increment(1);
                    tracing::warn!(wallet = %wallet, error = %e, "Malformed trade record dropped");
                }
            }
        }

        tracing::debug!(wallet = %wallet, events = events.len(), "Fetched trade events");
        Ok(events)
    }

    async fn mark_price(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, GatewayError> {
        self.get_historical_price(token, at.timestamp()).await
    }
}
