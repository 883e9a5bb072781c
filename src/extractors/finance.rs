//! Financial extractor
//!
//! Pulls amount, currency and direction out of a banking notification.

use crate::currency::normalize_code;
use crate::models::{FinanceExtraction, FinanceSchema, TransactionType};
use crate::oracle::{parse_json_object, str_field, LanguageModel};
use crate::prompts::render;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const FINANCE_TEMPERATURE: f32 = 0.1;

/// Keys only present in the detailed (canonical) schema
const DETAILED_KEYS: &[&str] = &["created_at", "confidence_score", "reasoning"];

#[derive(Debug, Clone)]
pub struct FinanceRequest<'a> {
    pub user_id: Uuid,
    pub received_at: DateTime<Utc>,
    /// Classifier summary, or the raw content when no summary exists
    pub text: &'a str,
    pub lang: &'a str,
}

#[async_trait]
pub trait FinancialExtractor: Send + Sync {
    async fn extract(&self, request: &FinanceRequest<'_>) -> FinanceExtraction;
}

/// Locale default when the oracle omits the currency.
pub fn default_currency_for(lang: &str) -> &'static str {
    match lang.trim().to_lowercase().as_str() {
        "vietnamese" | "vi" | "vi-vn" | "tiếng việt" => "VND",
        _ => "EUR",
    }
}

pub struct LlmFinancialExtractor {
    model: Arc<dyn LanguageModel>,
    prompt: String,
    local_offset: FixedOffset,
}

impl LlmFinancialExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, prompt: String, local_offset: FixedOffset) -> Self {
        Self {
            model,
            prompt,
            local_offset,
        }
    }

    async fn try_extract(&self, request: &FinanceRequest<'_>, currency: &str) -> Result<FinanceExtraction> {
        let received_local = request
            .received_at
            .with_timezone(&self.local_offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let system = render(
            &self.prompt,
            &[("default_currency", currency), ("received_at", &received_local)],
        );

        let raw = self
            .model
            .complete_json(&system, request.text, FINANCE_TEMPERATURE)
            .await?;
        let map = parse_json_object(&raw)?;

        Ok(normalize_finance(
            &map,
            currency,
            request.received_at,
            &self.local_offset,
        ))
    }
}

#[async_trait]
impl FinancialExtractor for LlmFinancialExtractor {
    async fn extract(&self, request: &FinanceRequest<'_>) -> FinanceExtraction {
        let currency = default_currency_for(request.lang);

        match self.try_extract(request, currency).await {
            Ok(extraction) => {
                debug!(
                    user_id = %request.user_id,
                    amount = ?extraction.amount,
                    currency = %extraction.currency,
                    kind = %extraction.type_of_transaction,
                    "Financial data extracted"
                );
                extraction
            }
            Err(e) => {
                warn!(user_id = %request.user_id, error = %e, "Financial extractor fail-safe triggered");
                FinanceExtraction::fail_safe(currency, request.received_at)
            }
        }
    }
}

/// Validate an oracle object. Bad amounts or types degrade to UNKNOWN.
pub fn normalize_finance(
    map: &Map<String, Value>,
    default_currency: &str,
    received_at: DateTime<Utc>,
    offset: &FixedOffset,
) -> FinanceExtraction {
    let schema = if DETAILED_KEYS.iter().any(|k| map.contains_key(*k)) {
        FinanceSchema::Detailed
    } else {
        FinanceSchema::Legacy
    };

    let amount = map
        .get("amount")
        .filter(|v| v.is_number())
        .and_then(Value::as_f64)
        .filter(|a| a.is_finite())
        .map(f64::abs);

    let type_of_transaction = match amount {
        None => TransactionType::Unknown,
        Some(_) => str_field(map, "type_of_transaction")
            .map(|t| TransactionType::parse_lenient(&t))
            .unwrap_or(TransactionType::Unknown),
    };

    let currency = str_field(map, "currency")
        .map(|c| normalize_code(&c))
        .unwrap_or_else(|| default_currency.to_string());

    let created_at = str_field(map, "created_at")
        .and_then(|s| parse_local_timestamp(&s, offset))
        .unwrap_or(received_at);

    let confidence_score = map
        .get("confidence_score")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0) as f32);

    FinanceExtraction {
        amount,
        currency,
        type_of_transaction,
        created_at,
        confidence_score,
        reasoning: str_field(map, "reasoning"),
        schema: Some(schema),
    }
}

fn parse_local_timestamp(value: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
}
