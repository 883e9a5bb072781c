//! Notification Classifier
//!
//! Asks the oracle for the intent of a notification and normalises the
//! answer into a strict [`ClassificationResult`]:
//! - FINANCE: money in or out, banking alerts
//! - SCHEDULE: meetings, appointments, tickets, deadlines
//! - OTHER: everything else (OTP, chat, promotions)
//!
//! The oracle is never trusted. Any failure yields the fail-safe default.

use crate::error::GatekeeperError;
use crate::models::{Category, ClassificationResult, NotificationEvent};
use crate::oracle::{parse_json_object, str_field, LanguageModel};
use crate::prompts::render;
use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const MIN_PRIORITY: i64 = 1;
const MAX_PRIORITY: i64 = 5;
const DEFAULT_PRIORITY: u8 = 3;
const CLASSIFIER_TEMPERATURE: f32 = 0.3;

/// Intent classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Never fails: oracle problems collapse into the fail-safe default.
    async fn classify(&self, event: &NotificationEvent, lang: &str) -> ClassificationResult;
}

/// Oracle-backed classifier
pub struct LlmClassifier {
    model: Arc<dyn LanguageModel>,
    prompt: String,
}

impl LlmClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, prompt: String) -> Self {
        Self { model, prompt }
    }

    async fn try_classify(&self, event: &NotificationEvent, lang: &str) -> Result<ClassificationResult> {
        let system = render(&self.prompt, &[("lang", lang)]);
        let user = format!(
            "App: {}\nTitle: {}\nReceived: {}\nContent: {}",
            event.source_app,
            event.title,
            event.received_at.to_rfc3339(),
            event.content
        );

        let raw = self
            .model
            .complete_json(&system, &user, CLASSIFIER_TEMPERATURE)
            .await?;
        let map = parse_json_object(&raw)?;
        normalize_classification(&map)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, event: &NotificationEvent, lang: &str) -> ClassificationResult {
        match self.try_classify(event, lang).await {
            Ok(result) => {
                debug!(
                    category = %result.category,
                    priority = result.priority,
                    is_spam = result.is_spam,
                    "Notification classified"
                );
                result
            }
            Err(e) => {
                warn!(source_app = %event.source_app, error = %e, "Classifier fail-safe triggered");
                ClassificationResult::fail_safe()
            }
        }
    }
}

/// Coerce an oracle object into a valid classification.
pub fn normalize_classification(map: &Map<String, Value>) -> Result<ClassificationResult> {
    let label = str_field(map, "classification")
        .or_else(|| str_field(map, "category"))
        .ok_or_else(|| GatekeeperError::Oracle("missing classification".to_string()))?;

    let (category, label_spam) = match label.to_uppercase().as_str() {
        "FINANCE" => (Category::Finance, false),
        "SCHEDULE" => (Category::Schedule, false),
        // Deprecated label set: TRASH / IMPORTANT
        "TRASH" | "SPAM" => (Category::Other, true),
        _ => (Category::Other, false),
    };

    let is_spam = match map.get("is_spam") {
        None | Some(Value::Null) => label_spam,
        Some(Value::Bool(b)) => *b || label_spam,
        Some(other) => {
            return Err(GatekeeperError::Oracle(format!(
                "is_spam is not a boolean: {}",
                other
            )))
        }
    };

    let priority = map
        .get("priority")
        .and_then(Value::as_i64)
        .map(|p| p.clamp(MIN_PRIORITY, MAX_PRIORITY) as u8)
        .unwrap_or(DEFAULT_PRIORITY);

    let summary = map
        .get("summary")
        .and_then(Value::as_str)
        .map(first_two_lines)
        .unwrap_or_default();

    let confidence_score = map
        .get("confidence_score")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0) as f32);

    Ok(ClassificationResult {
        category,
        is_spam,
        // Spam is always lowest priority, whatever the oracle said.
        priority: if is_spam { 1 } else { priority },
        summary,
        reasoning: str_field(map, "reasoning"),
        confidence_score,
    })
}

fn first_two_lines(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join("\n")
}
