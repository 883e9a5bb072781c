//! Language-model oracle abstraction
//!
//! Everything that asks a model for structured output goes through
//! [`LanguageModel`]. Responses are untrusted: callers parse them with
//! [`parse_json_object`] and fall back to typed defaults on any error.

use crate::error::GatekeeperError;
use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Single-attempt request/response oracle. No retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Ask for a JSON object. Returns the raw response text.
    async fn complete_json(&self, system: &str, user: &str, temperature: f32) -> Result<String>;
}

/// Parse a model response into a JSON object, tolerating ```json fences.
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(cleaned).map_err(|e| {
        GatekeeperError::Oracle(format!("response is not valid JSON: {}", e))
    })?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(GatekeeperError::Oracle(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read an optional string field, treating blanks as absent.
pub(crate) fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Json(String),
    Fail(String),
}

/// Scripted oracle for development & testing.
/// Replies are consumed in order; once exhausted every call fails.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<String>>,
    system_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            system_prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model that answers every call with the same body.
    pub fn always(body: &str) -> Self {
        Self::new(vec![ScriptedReply::Json(body.to_string()); 64])
    }

    pub fn json(bodies: &[&str]) -> Self {
        Self::new(
            bodies
                .iter()
                .map(|b| ScriptedReply::Json(b.to_string()))
                .collect(),
        )
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(vec![ScriptedReply::Fail(reason.to_string())])
    }

    /// User prompts received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered system prompts received so far, in call order.
    pub fn system_prompts(&self) -> Vec<String> {
        self.system_prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_json(&self, system: &str, user: &str, _temperature: f32) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(user.to_string());
        }
        if let Ok(mut prompts) = self.system_prompts.lock() {
            prompts.push(system.to_string());
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| GatekeeperError::Oracle("scripted model poisoned".to_string()))?
            .pop_front();

        match next {
            Some(ScriptedReply::Json(body)) => Ok(body),
            Some(ScriptedReply::Fail(reason)) => Err(GatekeeperError::Oracle(reason)),
            None => Err(GatekeeperError::Oracle("no scripted reply left".to_string())),
        }
    }
}
