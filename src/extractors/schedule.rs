//! Schedule extractor
//!
//! Finds an event title and start/end times in a notification. Relative
//! expressions are resolved by the oracle against the "now" we hand it.

use crate::models::ScheduleExtraction;
use crate::oracle::{parse_json_object, str_field, LanguageModel};
use crate::prompts::render;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Wire format for start/end times, in the user's local time.
pub const SCHEDULE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

const SCHEDULE_TEMPERATURE: f32 = 0.1;

#[async_trait]
pub trait ScheduleExtractor: Send + Sync {
    /// Never fails: returns all-`None` fields when the oracle is unusable.
    async fn extract(&self, content: &str, now: DateTime<Utc>) -> ScheduleExtraction;
}

pub struct LlmScheduleExtractor {
    model: Arc<dyn LanguageModel>,
    prompt: String,
    local_offset: FixedOffset,
}

impl LlmScheduleExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, prompt: String, local_offset: FixedOffset) -> Self {
        Self {
            model,
            prompt,
            local_offset,
        }
    }

    async fn try_extract(&self, content: &str, now: DateTime<Utc>) -> Result<ScheduleExtraction> {
        let current_time = now
            .with_timezone(&self.local_offset)
            .format(SCHEDULE_TIME_FORMAT)
            .to_string();
        let system = render(&self.prompt, &[("current_time", &current_time)]);

        let raw = self
            .model
            .complete_json(&system, content, SCHEDULE_TEMPERATURE)
            .await?;
        let map = parse_json_object(&raw)?;

        Ok(ScheduleExtraction {
            event_title: str_field(&map, "event_title"),
            start_time: str_field(&map, "start_time"),
            end_time: str_field(&map, "end_time"),
        })
    }
}

#[async_trait]
impl ScheduleExtractor for LlmScheduleExtractor {
    async fn extract(&self, content: &str, now: DateTime<Utc>) -> ScheduleExtraction {
        match self.try_extract(content, now).await {
            Ok(extraction) => {
                debug!(
                    title = ?extraction.event_title,
                    start = ?extraction.start_time,
                    "Schedule data extracted"
                );
                extraction
            }
            Err(e) => {
                warn!(error = %e, "Schedule extractor fail-safe triggered");
                ScheduleExtraction::default()
            }
        }
    }
}
