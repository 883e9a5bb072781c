//! Audit trail for processed notifications
//!
//! Every processed event leaves a content fingerprint and the list of
//! pipeline states it passed through, stored on its notification log.

use crate::error::GatekeeperError;
use crate::models::NotificationLog;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Received,
    Classified,
    TrustChecked,
    RiskBlocked,
    Extracted,
    Applied,
    Logged,
}

impl PipelineState {
    fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Classified, TrustChecked)
                | (Classified, RiskBlocked)
                | (Classified, Extracted)
                | (Classified, Logged)
                | (TrustChecked, Extracted)
                | (RiskBlocked, Logged)
                | (Extracted, Applied)
                | (Extracted, Logged)
                | (Applied, Logged)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceStep {
    pub state: PipelineState,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// Ordered record of the states one event went through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineTrace {
    pub log_id: Uuid,
    pub steps: Vec<TraceStep>,
}

impl PipelineTrace {
    pub fn start(log_id: Uuid, note: impl Into<String>) -> Self {
        Self {
            log_id,
            steps: vec![TraceStep {
                state: PipelineState::Received,
                at: Utc::now(),
                note: note.into(),
            }],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.steps
            .last()
            .map(|s| s.state)
            .unwrap_or(PipelineState::Received)
    }

    pub fn states(&self) -> Vec<PipelineState> {
        self.steps.iter().map(|s| s.state).collect()
    }

    pub fn advance(&mut self, next: PipelineState, note: impl Into<String>) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(GatekeeperError::Validation(format!(
                "illegal pipeline transition {:?} -> {:?}",
                current, next
            )));
        }

        self.steps.push(TraceStep {
            state: next,
            at: Utc::now(),
            note: note.into(),
        });
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current() == PipelineState::Logged
    }

    /// Compact JSON, stored in the log's `action_log` column.
    pub fn to_action_log(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
struct ContentFingerprint<'a> {
    source_app: &'a str,
    title: &'a str,
    content: &'a str,
}

/// SHA-256 over source, title and content. Identical notifications share a
/// hash, which makes reprocessed duplicates visible in the log.
pub fn compute_content_hash(source_app: &str, title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();

    let fingerprint = ContentFingerprint {
        source_app,
        title,
        content,
    };

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &fingerprint).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Check a stored log still matches its fingerprint.
pub fn verify_integrity(log: &NotificationLog) -> bool {
    compute_content_hash(&log.source_app, &log.title, &log.raw_content) == log.content_hash
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
