use notification_gatekeeper::{
    agent::RoutingOrchestrator,
    api::start_server,
    apps::{AppNameResolver, FallbackAppNameResolver, HttpAppNameResolver},
    config::GatekeeperConfig,
    currency::{CurrencyNormalizer, ExchangeRateApiClient},
    gemini::GeminiClient,
    prompts::Prompts,
    state::{InMemoryStore, PgStore, Store},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = GatekeeperConfig::from_env()?;

    info!("🚀 Notification Gatekeeper - API Server");
    info!("📍 Port: {}", config.api_port);

    if config.gemini_api_key.is_empty() {
        warn!("⚠️  GEMINI_API_KEY not set; every notification will take the fail-safe path");
    }

    // Create components
    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        &config.gemini_model,
        config.oracle_timeout,
    )?);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect_lazy(url)?),
        None => {
            warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let rates = ExchangeRateApiClient::new(&config.exchange_rate_base_url, config.rate_timeout)?;
    let converter = Arc::new(CurrencyNormalizer::new(Arc::new(rates), config.rate_timeout));

    let resolver: Arc<dyn AppNameResolver> = match &config.app_name_resolver_url {
        Some(url) => Arc::new(HttpAppNameResolver::new(url, config.rate_timeout)?),
        None => Arc::new(FallbackAppNameResolver),
    };

    let prompts = match &config.prompt_dir {
        Some(dir) => Prompts::from_dir(dir)?,
        None => Prompts::default(),
    };

    let orchestrator = Arc::new(RoutingOrchestrator::from_config(
        &config, model, store, converter, resolver, prompts,
    ));

    info!(
        account_policy = ?config.account_policy,
        trust_policy = ?config.trust_policy,
        "✅ Orchestrator initialized"
    );
    info!("📡 Starting API server...");

    start_server(orchestrator, config.api_port).await?;

    Ok(())
}
