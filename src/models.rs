//! Core data models for the notification pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Intent category. The classifier only ever yields `Finance`, `Schedule`
/// or `Other`; `Risk` is assigned by the orchestrator when a finance
/// notification fails the trust check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Finance,
    Schedule,
    Other,
    Risk,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Finance => "FINANCE",
            Category::Schedule => "SCHEDULE",
            Category::Other => "OTHER",
            Category::Risk => "RISK",
        }
    }

    /// Parse a stored label. Unknown labels read back as `Other`.
    pub fn from_db(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "FINANCE" => Category::Finance,
            "SCHEDULE" => Category::Schedule,
            "RISK" => Category::Risk,
            _ => Category::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Unknown,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::Unknown => "UNKNOWN",
        }
    }

    /// Strict parse: anything other than DEPOSIT / WITHDRAW is `Unknown`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "DEPOSIT" => TransactionType::Deposit,
            "WITHDRAW" => TransactionType::Withdraw,
            _ => TransactionType::Unknown,
        }
    }
}

//
// ================= Inbound =================
//

/// One inbound mobile notification. Created per call, never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: Uuid,
    pub source_app: String,
    pub content: String,
    #[serde(default)]
    pub title: String,
    /// User locale, e.g. "Vietnamese". Falls back to the configured default.
    #[serde(default)]
    pub language: Option<String>,
    pub received_at: DateTime<Utc>,
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub category: Category,
    pub is_spam: bool,
    /// 1..=5, always 1 when `is_spam`
    pub priority: u8,
    pub summary: String,
    pub reasoning: Option<String>,
    pub confidence_score: Option<f32>,
}

impl ClassificationResult {
    pub const FAIL_SAFE_SUMMARY: &'static str = "Error analyzing";

    /// Substituted whenever the classification oracle fails.
    pub fn fail_safe() -> Self {
        Self {
            category: Category::Other,
            is_spam: false,
            priority: 3,
            summary: Self::FAIL_SAFE_SUMMARY.to_string(),
            reasoning: None,
            confidence_score: None,
        }
    }
}

//
// ================= Extraction =================
//

/// Which oracle schema a financial extraction was read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinanceSchema {
    /// amount, currency, created_at, type, confidence_score, reasoning
    Detailed,
    /// Deprecated: amount, currency, type only.
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinanceExtraction {
    pub amount: Option<f64>,
    pub currency: String,
    pub type_of_transaction: TransactionType,
    pub created_at: DateTime<Utc>,
    pub confidence_score: Option<f32>,
    pub reasoning: Option<String>,
    /// `None` when the oracle call failed and this is the fail-safe record
    pub schema: Option<FinanceSchema>,
}

impl FinanceExtraction {
    pub fn fail_safe(currency: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            amount: Some(0.0),
            currency: currency.to_string(),
            type_of_transaction: TransactionType::Unknown,
            created_at: received_at,
            confidence_score: None,
            reasoning: None,
            schema: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleExtraction {
    pub event_title: Option<String>,
    /// "YYYY-MM-DD HH:mm" in the user's local time
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl ScheduleExtraction {
    /// A calendar entry needs both a title and a start time.
    pub fn is_actionable(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().map(str::trim).is_some_and(|s| !s.is_empty());
        present(&self.event_title) && present(&self.start_time)
    }
}

//
// ================= Ledger =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub institution_name: String,
    pub balance: f64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: Uuid, institution_name: &str, currency: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            institution_name: institution_name.to_string(),
            balance: 0.0,
            currency: currency.to_uppercase(),
            created_at: Utc::now(),
        }
    }
}

/// Immutable, append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    /// Original absolute amount, before currency normalization
    pub amount: f64,
    pub currency: String,
    pub type_of_transaction: TransactionType,
    pub is_over_budget_alert: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub user_id: Uuid,
    pub amount: Option<f64>,
    pub currency: String,
    pub type_of_transaction: TransactionType,
    pub institution_name: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LedgerOutcome {
    Success {
        new_balance: f64,
        account_currency: String,
        transaction_id: Uuid,
        alert_triggered: bool,
        ai_suggestion: Option<String>,
    },
    Ignored {
        message: String,
    },
    Error {
        message: String,
    },
}

//
// ================= Calendar =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub source_app: String,
    pub is_auto_generated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CalendarStatus {
    Created,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarOutcome {
    pub status: CalendarStatus,
    pub event_id: Uuid,
    pub event_title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Start time could not be parsed and was replaced with now + 1h
    pub start_time_defaulted: bool,
}

//
// ================= Audit =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_app: String,
    pub title: String,
    pub raw_content: String,
    pub summary: String,
    pub category: Category,
    pub priority: u8,
    pub is_spam: bool,
    pub is_risk: bool,
    pub risk_reason: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_included_in_briefing: bool,
    /// SHA-256 of source, title and content
    pub content_hash: String,
    pub action_log: String,
}

//
// ================= Pipeline Output =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinanceData {
    pub extraction: FinanceExtraction,
    pub result: LedgerOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleData {
    pub extraction: ScheduleExtraction,
    pub event: Option<CalendarOutcome>,
}

/// Response returned to the caller for every processed notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResponse {
    pub source_app: String,
    pub is_spam: bool,
    pub priority: u8,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub classification: Category,
    pub finance_data: Option<FinanceData>,
    pub schedule_data: Option<ScheduleData>,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
