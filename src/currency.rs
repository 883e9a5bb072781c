//! Currency normalization
//!
//! Converts amounts into an account's base currency. A live rate lookup is
//! tried first under a short deadline; any failure falls back to a static
//! table expressed as "1 unit -> VND". The fallback never fails.

use crate::error::GatekeeperError;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    /// Static safety net: value of one unit in VND.
    static ref FALLBACK_RATES_TO_VND: HashMap<&'static str, f64> = {
        let mut m = HashMap::new();
        m.insert("USD", 25_400.0);
        m.insert("EUR", 27_500.0);
        m.insert("JPY", 170.0);
        m.insert("KRW", 18.5);
        m.insert("VND", 1.0);
        m
    };
}

/// Map common symbols and casing onto ISO-like codes.
pub fn normalize_code(raw: &str) -> String {
    match raw.trim() {
        "₫" | "đ" | "Đ" | "VNĐ" | "vnđ" => "VND".to_string(),
        "$" | "US$" => "USD".to_string(),
        "€" => "EUR".to_string(),
        "¥" | "円" => "JPY".to_string(),
        "₩" | "원" => "KRW".to_string(),
        other => other.to_uppercase(),
    }
}

/// Unknown codes count as 1.0 against the base.
fn rate_to_base(code: &str) -> f64 {
    FALLBACK_RATES_TO_VND.get(code).copied().unwrap_or(1.0)
}

/// Cross rate from the static table: rate_to_base(from) / rate_to_base(to).
pub fn fallback_rate(from: &str, to: &str) -> f64 {
    rate_to_base(&normalize_code(from)) / rate_to_base(&normalize_code(to))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Same currency, no lookup
    Identity,
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub amount: f64,
    pub rate: f64,
    pub source: RateSource,
}

/// Live exchange-rate service. Best effort only.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Rates quoted as "1 `base` = rate[code]".
    async fn latest_rates(&self, base: &str) -> Result<HashMap<String, f64>>;
}

/// Currency conversion capability used by the ledger.
#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<Conversion>;
}

/// exchangerate-api.com style client: GET {base_url}/{BASE} -> {"rates": {...}}
pub struct ExchangeRateApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

impl ExchangeRateApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiClient {
    async fn latest_rates(&self, base: &str) -> Result<HashMap<String, f64>> {
        let url = format!("{}/{}", self.base_url, base);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatekeeperError::Currency(format!(
                "rate service returned {} for {}",
                status, base
            )));
        }

        let body: RatesResponse = response.json().await?;
        Ok(body.rates)
    }
}

/// Live rates with static fallback.
pub struct CurrencyNormalizer {
    provider: Option<Arc<dyn RateProvider>>,
    deadline: Duration,
}

impl CurrencyNormalizer {
    pub fn new(provider: Arc<dyn RateProvider>, deadline: Duration) -> Self {
        Self {
            provider: Some(provider),
            deadline,
        }
    }

    /// Static table only, no network.
    pub fn offline() -> Self {
        Self {
            provider: None,
            deadline: Duration::ZERO,
        }
    }

    async fn live_rate(&self, from: &str, to: &str) -> Result<f64> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| GatekeeperError::Currency("no live rate provider".to_string()))?;

        let rates = tokio::time::timeout(self.deadline, provider.latest_rates(from))
            .await
            .map_err(|_| GatekeeperError::Currency(format!("rate lookup for {} timed out", from)))??;

        rates
            .get(to)
            .copied()
            .filter(|r| r.is_finite() && *r > 0.0)
            .ok_or_else(|| GatekeeperError::Currency(format!("no usable {} rate for {}", to, from)))
    }
}

#[async_trait]
impl CurrencyConverter for CurrencyNormalizer {
    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<Conversion> {
        let from = normalize_code(from);
        let to = normalize_code(to);

        if from == to {
            return Ok(Conversion {
                amount,
                rate: 1.0,
                source: RateSource::Identity,
            });
        }

        let (rate, source) = match self.live_rate(&from, &to).await {
            Ok(rate) => (rate, RateSource::Live),
            Err(e) => {
                if self.provider.is_some() {
                    warn!(%from, %to, error = %e, "Live rate unavailable, using fallback table");
                }
                (fallback_rate(&from, &to), RateSource::Fallback)
            }
        };

        debug!(%from, %to, rate, ?source, "Currency converted");

        Ok(Conversion {
            amount: amount * rate,
            rate,
            source,
        })
    }
}
