use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::intelligence::{CostBasisPolicy, QualificationCriteria};
use crate::models::Timeframe;

const DEFAULT_BIRDEYE_URL: &str = "https://public-api.birdeye.so";

/// Upper bound on `CARRY_FORWARD_LOOKBACK_DAYS`, about ten years.
pub const MAX_LOOKBACK_DAYS: i64 = 3_650;

/// Gateway and runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub birdeye_api_key: String,
    pub birdeye_base_url: String,

    // Outbound call budget shared by every wallet in the run
    pub gateway_max_concurrency: usize,
    pub gateway_requests_per_second: u32,
    pub gateway_max_retries: u32,
    pub gateway_timeout: Duration,

    // Engine
    pub wallet_concurrency: usize,
    pub cost_basis_policy: CostBasisPolicy,
    pub carry_forward_lookback_days: i64,
    pub fail_fast: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let birdeye_api_key = env::var("BIRDEYE_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("BIRDEYE_API_KEY"))?;

        let config = Self {
            birdeye_api_key,
            birdeye_base_url: env::var("BIRDEYE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BIRDEYE_URL.into()),

            gateway_max_concurrency: env_parse("GATEWAY_MAX_CONCURRENCY", 4)?,
            gateway_requests_per_second: env_parse("GATEWAY_REQUESTS_PER_SECOND", 10)?,
            gateway_max_retries: env_parse("GATEWAY_MAX_RETRIES", 3)?,
            gateway_timeout: Duration::from_secs(env_parse("GATEWAY_TIMEOUT_SECS", 30)?),

            wallet_concurrency: env_parse("WALLET_CONCURRENCY", 8)?,
            cost_basis_policy: match env::var("COST_BASIS_POLICY") {
                Ok(raw) => raw.parse()?,
                Err(_) => CostBasisPolicy::default(),
            },
            carry_forward_lookback_days: env_parse("CARRY_FORWARD_LOOKBACK_DAYS", 30)?,
            fail_fast: env_parse("FAIL_FAST", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway_max_concurrency == 0 {
            return Err(invalid("GATEWAY_MAX_CONCURRENCY", "0"));
        }
        if self.gateway_requests_per_second == 0 {
            return Err(invalid("GATEWAY_REQUESTS_PER_SECOND", "0"));
        }
        if self.wallet_concurrency == 0 {
            return Err(invalid("WALLET_CONCURRENCY", "0"));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.carry_forward_lookback_days) {
            return Err(invalid(
                "CARRY_FORWARD_LOOKBACK_DAYS",
                &self.carry_forward_lookback_days.to_string(),
            ));
        }
        Ok(())
    }

    /// History fetched before the window start to seed carried positions.
    pub fn lookback(&self) -> chrono::Duration {
        match self.cost_basis_policy {
            CostBasisPolicy::CarryForward => {
                chrono::Duration::try_days(self.carry_forward_lookback_days)
                    .unwrap_or(chrono::Duration::MAX)
            }
            CostBasisPolicy::WindowOnly => chrono::Duration::zero(),
        }
    }
}

/// Raw analysis parameters as supplied on the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct CriteriaInput {
    pub min_capital: Option<String>,
    pub min_holding_period_secs: Option<String>,
    pub min_total_pnl: Option<String>,
    pub min_win_rate: Option<String>,
    pub timeframe: Option<String>,
}

impl CriteriaInput {
    /// Parse and validate. Nothing is processed until this succeeds.
    pub fn into_criteria(self) -> Result<QualificationCriteria, ConfigError> {
        let timeframe: Timeframe = required("timeframe", self.timeframe)?.parse()?;

        QualificationCriteria::new(
            parse_decimal("min capital", self.min_capital)?,
            parse_decimal("min holding period", self.min_holding_period_secs)?,
            parse_decimal("min total PnL", self.min_total_pnl)?,
            parse_decimal("min win rate", self.min_win_rate)?,
            timeframe,
        )
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(field))
}

fn parse_decimal(field: &'static str, value: Option<String>) -> Result<Decimal, ConfigError> {
    let raw = required(field, value)?;
    Decimal::from_str(&raw).map_err(|_| ConfigError::Invalid { field, value: raw })
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
        Err(_) => Ok(default),
    }
}

fn invalid(field: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
    }
}
