//! Structured data extractors
//!
//! Each extractor asks the oracle for one schema and is fail-safe: it never
//! returns an error, only a well-typed "unknown" value.

pub mod finance;
pub mod schedule;

pub use finance::{default_currency_for, FinanceRequest, FinancialExtractor, LlmFinancialExtractor};
pub use schedule::{LlmScheduleExtractor, ScheduleExtractor, SCHEDULE_TIME_FORMAT};
