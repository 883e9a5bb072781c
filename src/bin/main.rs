//! Offline demo: runs a few notifications through the pipeline with a
//! scripted oracle and the in-memory store.

use chrono::Utc;
use notification_gatekeeper::{
    agent::RoutingOrchestrator,
    apps::FallbackAppNameResolver,
    briefing::{BriefingService, DEFAULT_ALERT_LIMIT},
    config::GatekeeperConfig,
    currency::CurrencyNormalizer,
    models::{Account, NotificationEvent},
    oracle::ScriptedModel,
    prompts::Prompts,
    state::{InMemoryStore, Store},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SCRIPT: &[&str] = &[
    r#"{"classification": "FINANCE", "is_spam": false, "priority": 4,
        "summary": "Card payment of 100 USD", "confidence_score": 0.93}"#,
    r#"{"amount": 100, "currency": "USD", "created_at": "", "type_of_transaction": "WITHDRAW",
        "confidence_score": 0.9, "reasoning": "card debit"}"#,
    r#"{"classification": "FINANCE", "is_spam": false, "priority": 5,
        "summary": "You received 5,000,000 VND"}"#,
    r#"{"classification": "SCHEDULE", "is_spam": false, "priority": 3,
        "summary": "Team sync tomorrow at 15:00"}"#,
    r#"{"event_title": "Team sync", "start_time": "2026-10-17 15:00", "end_time": null}"#,
    r#"{"classification": "TRASH", "is_spam": true, "priority": 2, "summary": "Flash sale"}"#,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Notification Gatekeeper demo starting");

    let config = GatekeeperConfig::default();
    let store = Arc::new(InMemoryStore::new());

    let orchestrator = RoutingOrchestrator::from_config(
        &config,
        Arc::new(ScriptedModel::json(SCRIPT)),
        store.clone(),
        Arc::new(CurrencyNormalizer::offline()),
        Arc::new(FallbackAppNameResolver),
        Prompts::default(),
    );

    let user_id = Uuid::new_v4();
    let account = store
        .register_account(Account::new(user_id, "MBBank", "VND"))
        .await?;
    let mut tx = store.begin().await?;
    tx.apply_balance_delta(account.id, 10_000_000.0).await?;
    tx.commit().await?;

    let notifications = [
        ("MBBank", "Thanh toan the -100 USD tai AMAZON"),
        ("FakeBank", "Ban nhan duoc 5,000,000 VND. Bam vao day de xac nhan"),
        ("Slack", "Team sync tomorrow at 3pm"),
        ("Shopee", "FLASH SALE 50%!!!"),
    ];

    for (source_app, content) in notifications {
        let run = orchestrator
            .process(NotificationEvent {
                user_id,
                source_app: source_app.to_string(),
                content: content.to_string(),
                title: String::new(),
                language: None,
                received_at: Utc::now(),
            })
            .await?;

        println!("\n=== {} ===", source_app);
        println!("Classification: {}", run.response.classification);
        println!("Priority: {}", run.response.priority);
        println!("Summary: {}", run.log.summary);
        println!("States: {:?}", run.trace.states());
        if let Some(finance) = &run.response.finance_data {
            println!("Ledger: {}", serde_json::to_string(&finance.result)?);
        }
        if let Some(event) = run.response.schedule_data.as_ref().and_then(|s| s.event.as_ref()) {
            println!("Calendar: {} at {}", event.event_title, event.start_time);
        }
    }

    let balance = store
        .accounts_for_user(user_id)
        .await?
        .first()
        .map(|a| a.balance)
        .unwrap_or_default();
    println!("\nMBBank balance: {:.0} VND", balance);

    let briefing = BriefingService::new(store.clone());
    println!("\n=== BRIEFING ===\n{}", briefing.fetch_briefing(user_id).await?.briefing);

    println!("\n=== ALERTS ===");
    for alert in briefing.recent_alerts(user_id, DEFAULT_ALERT_LIMIT).await? {
        println!("[{}] {}: {}", alert.category, alert.source, alert.summary);
    }

    Ok(())
}
