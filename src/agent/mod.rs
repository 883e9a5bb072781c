//! Routing orchestrator - drives one notification through the pipeline
//!
//! RECEIVED → CLASSIFIED → TRUST_CHECKED? → EXTRACTED → APPLIED → LOGGED
//!
//! Early exits: CLASSIFIED → RISK_BLOCKED → LOGGED for untrusted finance
//! sources, CLASSIFIED → LOGGED for spam and OTHER.

use crate::apps::AppNameResolver;
use crate::audit::{compute_content_hash, PipelineState, PipelineTrace};
use crate::budget::BudgetEvaluator;
use crate::calendar::CalendarService;
use crate::classifier::{Classifier, LlmClassifier};
use crate::config::GatekeeperConfig;
use crate::currency::CurrencyConverter;
use crate::extractors::{
    FinanceRequest, FinancialExtractor, LlmFinancialExtractor, LlmScheduleExtractor,
    ScheduleExtractor,
};
use crate::ledger::LedgerService;
use crate::models::{
    Category, FinanceData, FinanceExtraction, LedgerOutcome, NotificationEvent, NotificationLog,
    PipelineResponse, ScheduleData, TransactionRequest,
};
use crate::oracle::LanguageModel;
use crate::prompts::Prompts;
use crate::state::Store;
use crate::verification::TrustVerifier;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SECURITY_ALERT_PREFIX: &str = "[SECURITY ALERT]";
const RISK_PRIORITY: u8 = 5;
const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Everything one call to [`RoutingOrchestrator::process`] produced.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub response: PipelineResponse,
    pub trace: PipelineTrace,
    pub log: NotificationLog,
}

/// Finance work decided before the write transaction opens.
struct FinancePlan {
    extraction: FinanceExtraction,
    institution: String,
}

pub struct RoutingOrchestrator {
    classifier: Arc<dyn Classifier>,
    trust: TrustVerifier,
    finance: Arc<dyn FinancialExtractor>,
    schedule: Arc<dyn ScheduleExtractor>,
    ledger: LedgerService,
    calendar: CalendarService,
    store: Arc<dyn Store>,
    retention: Duration,
    default_language: String,
}

impl RoutingOrchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        trust: TrustVerifier,
        finance: Arc<dyn FinancialExtractor>,
        schedule: Arc<dyn ScheduleExtractor>,
        ledger: LedgerService,
        calendar: CalendarService,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            classifier,
            trust,
            finance,
            schedule,
            ledger,
            calendar,
            store,
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            default_language: "Vietnamese".to_string(),
        }
    }

    /// Wire the default LLM-backed adapters from configuration.
    pub fn from_config(
        config: &GatekeeperConfig,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn Store>,
        converter: Arc<dyn CurrencyConverter>,
        resolver: Arc<dyn AppNameResolver>,
        prompts: Prompts,
    ) -> Self {
        let classifier = Arc::new(LlmClassifier::new(model.clone(), prompts.classifier));
        let finance = Arc::new(LlmFinancialExtractor::new(
            model.clone(),
            prompts.finance,
            config.local_offset,
        ));
        let schedule = Arc::new(LlmScheduleExtractor::new(
            model,
            prompts.schedule,
            config.local_offset,
        ));

        let trust = TrustVerifier::new(store.clone(), resolver, config.trust_policy);
        let ledger = LedgerService::new(
            converter,
            BudgetEvaluator::new(config.budget),
            config.account_policy,
        );
        let calendar = CalendarService::new(config.local_offset);

        Self::new(classifier, trust, finance, schedule, ledger, calendar, store)
            .with_retention_days(config.log_retention_days)
            .with_default_language(&config.default_language)
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = Duration::days(days);
        self
    }

    pub fn with_default_language(mut self, language: &str) -> Self {
        self.default_language = language.to_string();
        self
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub async fn process(&self, event: NotificationEvent) -> Result<PipelineRun> {
        self.process_at(event, Utc::now()).await
    }

    /// Run one event to LOGGED. Only store failures surface as `Err`; oracle
    /// and currency problems are absorbed by the adapters.
    pub async fn process_at(&self, event: NotificationEvent, now: DateTime<Utc>) -> Result<PipelineRun> {
        info!(
            user_id = %event.user_id,
            source_app = %event.source_app,
            "Orchestrator: notification received"
        );

        self.purge_expired_logs(now).await;

        let log_id = Uuid::new_v4();
        let mut trace = PipelineTrace::start(log_id, event.source_app.clone());

        let lang = event
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(self.default_language.as_str())
            .to_string();

        // === CLASSIFY ===
        let classification = self.classifier.classify(&event, &lang).await;
        trace.advance(
            PipelineState::Classified,
            format!(
                "{} (priority {}, spam {})",
                classification.category, classification.priority, classification.is_spam
            ),
        )?;

        let mut category = classification.category;
        let mut priority = classification.priority;
        let mut summary = classification.summary.clone();
        let mut risk_reason = None;
        let mut finance_plan = None;
        let mut schedule_extraction = None;

        if classification.is_spam {
            debug!(user_id = %event.user_id, "Spam, skipping extraction");
        } else {
            match category {
                Category::Finance => {
                    // === TRUST CHECK ===
                    let verdict = self.trust.verify_source(event.user_id, &event.source_app).await?;

                    if verdict.is_trusted {
                        trace.advance(PipelineState::TrustChecked, verdict.reason.clone())?;

                        // === EXTRACT ===
                        let text = if event.content.trim().is_empty() {
                            summary.as_str()
                        } else {
                            event.content.as_str()
                        };
                        let extraction = self
                            .finance
                            .extract(&FinanceRequest {
                                user_id: event.user_id,
                                received_at: event.received_at,
                                text,
                                lang: &lang,
                            })
                            .await;
                        trace.advance(
                            PipelineState::Extracted,
                            format!(
                                "{:?} {} {}",
                                extraction.amount, extraction.currency, extraction.type_of_transaction
                            ),
                        )?;

                        finance_plan = Some(FinancePlan {
                            extraction,
                            institution: verdict
                                .matched_institution
                                .unwrap_or_else(|| event.source_app.clone()),
                        });
                    } else {
                        category = Category::Risk;
                        priority = RISK_PRIORITY;
                        summary = format!("{} {}", SECURITY_ALERT_PREFIX, verdict.reason);
                        trace.advance(PipelineState::RiskBlocked, verdict.reason.clone())?;
                        risk_reason = Some(verdict.reason);
                    }
                }
                Category::Schedule => {
                    let extraction = self.schedule.extract(&event.content, now).await;
                    trace.advance(
                        PipelineState::Extracted,
                        format!("{:?} @ {:?}", extraction.event_title, extraction.start_time),
                    )?;
                    schedule_extraction = Some(extraction);
                }
                Category::Other | Category::Risk => {}
            }
        }

        // === APPLY ===
        let mut tx = self.store.begin().await?;

        let finance_data = match finance_plan {
            Some(plan) => {
                let request = TransactionRequest {
                    user_id: event.user_id,
                    amount: plan.extraction.amount,
                    currency: plan.extraction.currency.clone(),
                    type_of_transaction: plan.extraction.type_of_transaction,
                    institution_name: plan.institution,
                    received_at: plan.extraction.created_at,
                };
                let result = self.ledger.process_transaction(tx.as_mut(), &request).await?;

                if let LedgerOutcome::Success { transaction_id, .. } = &result {
                    trace.advance(PipelineState::Applied, format!("transaction {}", transaction_id))?;
                }

                Some(FinanceData {
                    extraction: plan.extraction,
                    result,
                })
            }
            None => None,
        };

        let schedule_data = match schedule_extraction {
            Some(extraction) => {
                let event_outcome = match (&extraction.event_title, extraction.is_actionable()) {
                    (Some(title), true) => {
                        let outcome = self
                            .calendar
                            .create_event(
                                tx.as_mut(),
                                event.user_id,
                                title,
                                extraction.start_time.as_deref(),
                                extraction.end_time.as_deref(),
                                &event.source_app,
                                now,
                            )
                            .await?;
                        trace.advance(PipelineState::Applied, format!("event {}", outcome.event_id))?;
                        Some(outcome)
                    }
                    _ => {
                        debug!(user_id = %event.user_id, "Schedule data incomplete, no event created");
                        None
                    }
                };

                Some(ScheduleData {
                    extraction,
                    event: event_outcome,
                })
            }
            None => None,
        };

        // === LOG ===
        trace.advance(PipelineState::Logged, category.as_str())?;

        let log = NotificationLog {
            id: log_id,
            user_id: event.user_id,
            source_app: event.source_app.clone(),
            title: event.title.clone(),
            raw_content: event.content.clone(),
            summary,
            category,
            priority,
            is_spam: classification.is_spam,
            is_risk: risk_reason.is_some(),
            risk_reason,
            received_at: event.received_at,
            is_included_in_briefing: false,
            content_hash: compute_content_hash(&event.source_app, &event.title, &event.content),
            action_log: trace.to_action_log()?,
        };
        tx.insert_notification_log(&log).await?;
        tx.commit().await?;

        info!(
            user_id = %event.user_id,
            log_id = %log_id,
            category = %category,
            priority,
            states = ?trace.states(),
            "Orchestrator: notification logged"
        );

        Ok(PipelineRun {
            response: PipelineResponse {
                source_app: event.source_app,
                is_spam: classification.is_spam,
                priority,
                content: event.content,
                received_at: event.received_at,
                classification: category,
                finance_data,
                schedule_data,
            },
            trace,
            log,
        })
    }

    /// Best-effort retention sweep; failures never block the event.
    async fn purge_expired_logs(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        match self.store.purge_logs_before(cutoff).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, %cutoff, "Expired notification logs purged"),
            Err(e) => warn!(error = %e, "Log retention purge failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::FallbackAppNameResolver;
    use crate::config::{AccountPolicy, TrustPolicy};
    use crate::currency::CurrencyNormalizer;
    use crate::models::{Account, CalendarStatus, TransactionType};
    use crate::oracle::ScriptedModel;
    use crate::state::InMemoryStore;
    use chrono::TimeZone;

    const FINANCE_CLASS: &str =
        r#"{"classification": "FINANCE", "is_spam": false, "priority": 4, "summary": "Card payment"}"#;
    const SCHEDULE_CLASS: &str =
        r#"{"classification": "SCHEDULE", "is_spam": false, "priority": 3, "summary": "Meeting"}"#;

    struct Harness {
        store: Arc<InMemoryStore>,
        model: Arc<ScriptedModel>,
        orchestrator: RoutingOrchestrator,
    }

    fn harness(replies: &[&str], trust_policy: TrustPolicy) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedModel::json(replies));
        let config = GatekeeperConfig {
            trust_policy,
            account_policy: AccountPolicy::AutoCreate,
            ..GatekeeperConfig::default()
        };

        let orchestrator = RoutingOrchestrator::from_config(
            &config,
            model.clone(),
            store.clone(),
            Arc::new(CurrencyNormalizer::offline()),
            Arc::new(FallbackAppNameResolver),
            Prompts::default(),
        );

        Harness {
            store,
            model,
            orchestrator,
        }
    }

    fn event(user_id: Uuid, source_app: &str, content: &str) -> NotificationEvent {
        NotificationEvent {
            user_id,
            source_app: source_app.to_string(),
            content: content.to_string(),
            title: String::new(),
            language: Some("Vietnamese".to_string()),
            received_at: Utc::now(),
        }
    }

    async fn register(store: &InMemoryStore, user_id: Uuid, institution: &str, balance: f64) {
        let account = store
            .register_account(Account::new(user_id, institution, "VND"))
            .await
            .unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.apply_balance_delta(account.id, balance).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_trusted_withdrawal_updates_ledger() {
        let h = harness(
            &[
                FINANCE_CLASS,
                r#"{"amount": 100, "currency": "USD", "created_at": "2026-10-16 08:00:00",
                    "type_of_transaction": "WITHDRAW", "confidence_score": 0.9, "reasoning": "debit"}"#,
            ],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();
        register(&h.store, user_id, "MBBank", 10_000_000.0).await;

        let run = h
            .orchestrator
            .process(event(user_id, "MBBank", "Thanh toan the 100 USD"))
            .await
            .unwrap();

        assert_eq!(run.response.classification, Category::Finance);
        let finance = run.response.finance_data.expect("finance data");
        match finance.result {
            LedgerOutcome::Success {
                new_balance,
                alert_triggered,
                ..
            } => {
                assert_eq!(new_balance, 7_460_000.0);
                assert!(!alert_triggered);
            }
            other => panic!("unexpected ledger outcome: {:?}", other),
        }

        assert_eq!(
            run.trace.states(),
            vec![
                PipelineState::Received,
                PipelineState::Classified,
                PipelineState::TrustChecked,
                PipelineState::Extracted,
                PipelineState::Applied,
                PipelineState::Logged
            ]
        );
        assert_eq!(h.store.transactions_for_user(user_id).await.unwrap().len(), 1);
        assert_eq!(h.store.logs_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_untrusted_source_is_risk_blocked() {
        let h = harness(&[FINANCE_CLASS], TrustPolicy::Enforce);
        let user_id = Uuid::new_v4();
        register(&h.store, user_id, "MBBank", 1_000.0).await;

        let run = h
            .orchestrator
            .process(event(user_id, "FakeBank", "You received 5,000,000 VND, click here"))
            .await
            .unwrap();

        assert_eq!(run.response.classification, Category::Risk);
        assert_eq!(run.response.priority, 5);
        assert!(run.response.finance_data.is_none());
        assert!(run.log.is_risk);
        assert_eq!(
            run.log.summary,
            "[SECURITY ALERT] UNTRUSTED SOURCE: 'FakeBank' is not in your registered accounts."
        );
        assert!(run.trace.states().contains(&PipelineState::RiskBlocked));

        // Extractor never consulted, ledger untouched
        assert_eq!(h.model.calls().len(), 1);
        assert!(h.store.transactions_for_user(user_id).await.unwrap().is_empty());
        assert_eq!(h.store.accounts_for_user(user_id).await.unwrap()[0].balance, 1_000.0);
    }

    #[tokio::test]
    async fn test_lookalike_package_is_risk_blocked() {
        let h = harness(
            &[
                FINANCE_CLASS,
                r#"{"amount": 9000000, "currency": "VND", "type_of_transaction": "WITHDRAW"}"#,
            ],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();
        register(&h.store, user_id, "MBBank", 1_000.0).await;

        let run = h
            .orchestrator
            .process(event(user_id, "com.scammer.phish.mbbank", "-9,000,000 VND"))
            .await
            .unwrap();

        assert_eq!(run.response.classification, Category::Risk);
        assert!(run.response.finance_data.is_none());
        assert_eq!(h.model.calls().len(), 1);
        assert!(h.store.transactions_for_user(user_id).await.unwrap().is_empty());
        let accounts = h.store.accounts_for_user(user_id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].balance, 1_000.0);
    }

    #[tokio::test]
    async fn test_disabled_trust_books_against_resolved_name() {
        let h = harness(
            &[
                FINANCE_CLASS,
                r#"{"amount": 50000, "currency": "VND", "type_of_transaction": "DEPOSIT"}"#,
            ],
            TrustPolicy::Disabled,
        );
        let user_id = Uuid::new_v4();

        let run = h
            .orchestrator
            .process(event(user_id, "com.mservice.momo", "+50,000 VND"))
            .await
            .unwrap();

        assert_eq!(run.response.classification, Category::Finance);
        let accounts = h.store.accounts_for_user(user_id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].institution_name, "Momo");
        assert_eq!(accounts[0].balance, 50_000.0);
    }

    #[tokio::test]
    async fn test_unusable_amount_is_ignored_but_logged() {
        let h = harness(
            &[
                FINANCE_CLASS,
                r#"{"amount": "a lot", "currency": "VND", "type_of_transaction": "WITHDRAW"}"#,
            ],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();
        register(&h.store, user_id, "MBBank", 1_000.0).await;

        let run = h
            .orchestrator
            .process(event(user_id, "mbbank", "Balance changed"))
            .await
            .unwrap();

        let finance = run.response.finance_data.expect("finance data");
        assert!(matches!(finance.result, LedgerOutcome::Ignored { .. }));
        assert_eq!(finance.extraction.type_of_transaction, TransactionType::Unknown);
        assert!(!run.trace.states().contains(&PipelineState::Applied));
        assert!(h.store.transactions_for_user(user_id).await.unwrap().is_empty());
        assert_eq!(h.store.logs_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_creates_event() {
        let h = harness(
            &[
                SCHEDULE_CLASS,
                r#"{"event_title": "Team sync", "start_time": "2026-10-17 15:00", "end_time": "2026-10-17 16:00"}"#,
            ],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();

        let run = h
            .orchestrator
            .process(event(user_id, "Slack", "Team sync tomorrow 3pm"))
            .await
            .unwrap();

        let schedule = run.response.schedule_data.expect("schedule data");
        let created = schedule.event.expect("calendar event");
        assert_eq!(created.status, CalendarStatus::Created);
        assert_eq!(created.event_title, "Team sync");
        assert_eq!(h.store.schedule_events_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_start_time_skips_calendar() {
        let h = harness(
            &[
                SCHEDULE_CLASS,
                r#"{"event_title": "Dinner", "start_time": null, "end_time": null}"#,
            ],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();

        let run = h
            .orchestrator
            .process(event(user_id, "Messenger", "Dinner sometime?"))
            .await
            .unwrap();

        let schedule = run.response.schedule_data.expect("schedule data");
        assert!(schedule.event.is_none());
        assert!(h.store.schedule_events_for_user(user_id).await.unwrap().is_empty());

        let logs = h.store.logs_for_user(user_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].category, Category::Schedule);
    }

    #[tokio::test]
    async fn test_spam_goes_straight_to_log() {
        let h = harness(
            &[r#"{"classification": "FINANCE", "is_spam": true, "priority": 5, "summary": "Promo"}"#],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();

        let run = h
            .orchestrator
            .process(event(user_id, "Shopee", "50% cashback!!!"))
            .await
            .unwrap();

        assert!(run.response.is_spam);
        assert_eq!(run.response.priority, 1);
        assert!(run.response.finance_data.is_none());
        assert_eq!(
            run.trace.states(),
            vec![PipelineState::Received, PipelineState::Classified, PipelineState::Logged]
        );
        assert_eq!(h.model.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_oracle_outage_is_logged_as_other() {
        let h = harness(&[], TrustPolicy::Enforce);
        let user_id = Uuid::new_v4();

        let run = h
            .orchestrator
            .process(event(user_id, "MBBank", "-500,000 VND"))
            .await
            .unwrap();

        assert_eq!(run.response.classification, Category::Other);
        assert_eq!(run.log.summary, "Error analyzing");
        assert_eq!(h.store.logs_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reprocessing_is_not_idempotent() {
        let deposit = r#"{"amount": 1000, "currency": "VND", "type_of_transaction": "DEPOSIT"}"#;
        let h = harness(
            &[FINANCE_CLASS, deposit, FINANCE_CLASS, deposit],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();
        register(&h.store, user_id, "MBBank", 0.0).await;

        let notification = event(user_id, "MBBank", "+1,000 VND");
        let first = h.orchestrator.process(notification.clone()).await.unwrap();
        let second = h.orchestrator.process(notification).await.unwrap();

        assert_ne!(first.log.id, second.log.id);
        assert_eq!(first.log.content_hash, second.log.content_hash);
        assert_eq!(h.store.logs_for_user(user_id).await.unwrap().len(), 2);
        assert_eq!(h.store.transactions_for_user(user_id).await.unwrap().len(), 2);
        assert_eq!(h.store.accounts_for_user(user_id).await.unwrap()[0].balance, 2_000.0);
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_and_leaves_no_trace() {
        let h = harness(
            &[
                FINANCE_CLASS,
                r#"{"amount": 1000, "currency": "VND", "type_of_transaction": "DEPOSIT"}"#,
            ],
            TrustPolicy::Enforce,
        );
        let user_id = Uuid::new_v4();
        register(&h.store, user_id, "MBBank", 0.0).await;
        h.store.simulate_commit_failure(true);

        let result = h
            .orchestrator
            .process(event(user_id, "MBBank", "+1,000 VND"))
            .await;

        assert!(result.is_err());
        assert!(h.store.logs_for_user(user_id).await.unwrap().is_empty());
        assert!(h.store.transactions_for_user(user_id).await.unwrap().is_empty());
        assert_eq!(h.store.accounts_for_user(user_id).await.unwrap()[0].balance, 0.0);
    }

    #[tokio::test]
    async fn test_expired_logs_purged_before_processing() {
        let h = harness(&[], TrustPolicy::Enforce);
        let user_id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

        let mut old = event(user_id, "Zalo", "old");
        old.received_at = now - Duration::days(31);
        h.orchestrator.process_at(old, now - Duration::days(31)).await.unwrap();
        assert_eq!(h.store.logs_for_user(user_id).await.unwrap().len(), 1);

        let mut fresh = event(user_id, "Zalo", "fresh");
        fresh.received_at = now;
        h.orchestrator.process_at(fresh, now).await.unwrap();

        let logs = h.store.logs_for_user(user_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].raw_content, "fresh");
    }
}
