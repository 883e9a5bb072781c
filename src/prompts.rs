//! Oracle instructions
//!
//! Prompt text is configuration: the built-in defaults can be replaced by
//! files in `PROMPT_DIR` (`classifier.txt`, `finance.txt`, `schedule.txt`).
//! Templates use `{placeholder}` markers filled by [`render`].

use crate::Result;
use std::path::Path;
use tracing::info;

const CLASSIFIER_PROMPT: &str = r#"Role: Notification Gatekeeper - filtering agent for Android notifications.
Goal: filter noise and structure data.
Output language: {lang}.

Rules:
- A notification is FINANCE only if source_app is a banking or wallet app.
  If source_app is not a banking or wallet app the classification MUST NOT be FINANCE,
  even when the text mentions money.
- If is_spam is true, priority MUST be 1. Priority 4-5 is for non-spam only.
- Personal messages from messaging apps that are not advertisements are never spam.
- Notifications about meetings, appointments, flights or deadlines are SCHEDULE.
- For FINANCE, the summary states deposit or withdrawal and the balance.
- Mask personal data (e.g. Account ****1234).
- Output strictly valid JSON, no extra fields.

Output format:
{
  "source_app": "", "is_spam": boolean,
  "classification": "FINANCE" | "SCHEDULE" | "OTHER", "priority": 1-5,
  "summary": "max 2 lines", "reasoning": "", "confidence_score": 0.0-1.0
}"#;

const FINANCE_PROMPT: &str = r#"Role: Financial parser for bank SMS and notifications.
Task: extract the transaction described in the notification.
Notification received at: {received_at}.

Rules:
- amount: positive float (absolute value), null if there is no amount.
- type_of_transaction: "DEPOSIT", "WITHDRAW" or "UNKNOWN".
- currency: ISO code. Default to '{default_currency}' if unclear.
- created_at: YYYY-MM-DD HH:MM:SS, the transaction time if stated, else the received time.
- Never include OTPs or full account numbers.
- Output strictly valid JSON, no extra fields.

Output format:
{
  "amount": 0.0, "currency": "{default_currency}",
  "created_at": "", "type_of_transaction": "DEPOSIT" | "WITHDRAW" | "UNKNOWN",
  "confidence_score": 0.0, "reasoning": ""
}"#;

const SCHEDULE_PROMPT: &str = r#"Role: Expert scheduler.
Task: extract an event title, start time and end time.
Context: the current time is {current_time}.

Rules:
1. event_title: short.
2. start_time and end_time: strict format 'YYYY-MM-DD HH:MM'.
3. Resolve relative expressions ("in 2 hours", "at 8 tonight", "tomorrow") against
   the current time above, never against other times mentioned in the text.
4. If the year is missing, use the current year, or next year if the date has passed.
5. end_time is null when not stated.

Output format:
{ "event_title": string, "start_time": string, "end_time": string | null }"#;

#[derive(Debug, Clone)]
pub struct Prompts {
    pub classifier: String,
    pub finance: String,
    pub schedule: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            classifier: CLASSIFIER_PROMPT.to_string(),
            finance: FINANCE_PROMPT.to_string(),
            schedule: SCHEDULE_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// Defaults, with any file present in `dir` taking precedence.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut prompts = Self::default();

        for (file, slot) in [
            ("classifier.txt", &mut prompts.classifier),
            ("finance.txt", &mut prompts.finance),
            ("schedule.txt", &mut prompts.schedule),
        ] {
            let path = dir.join(file);
            if path.is_file() {
                *slot = std::fs::read_to_string(&path)?;
                info!(path = %path.display(), "Loaded prompt override");
            }
        }

        Ok(prompts)
    }
}

/// Replace every `{key}` marker with its value.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
