//! Notification Gatekeeper
//!
//! Ingests mobile notifications and routes each one through a fail-safe
//! pipeline:
//! - Classifies intent with a language-model oracle (never trusted blindly)
//! - Blocks finance notifications from unregistered sources as RISK
//! - Extracts amounts or schedule data and applies deterministic rules
//! - Commits ledger, calendar and audit-log changes as one unit per event
//!
//! PIPELINE:
//! RECEIVED → CLASSIFIED → TRUST_CHECKED → EXTRACTED → APPLIED → LOGGED

pub mod agent;
pub mod api;
pub mod apps;
pub mod audit;
pub mod briefing;
pub mod budget;
pub mod calendar;
pub mod classifier;
pub mod config;
pub mod currency;
pub mod error;
pub mod extractors;
pub mod gemini;
pub mod ledger;
pub mod models;
pub mod oracle;
pub mod prompts;
pub mod state;
pub mod verification;

pub use error::{GatekeeperError, Result};

// Re-export common types
pub use agent::{PipelineRun, RoutingOrchestrator};
pub use config::GatekeeperConfig;
pub use models::*;
