use std::path::Path;
use std::sync::Arc;

use remind_engine::channels::{
    AdapterSet, EmailAdapter, EmailAdapterConfig, InAppAdapter, PushAdapter, PushAdapterConfig,
    SmsAdapter, SmsAdapterConfig,
};
use remind_engine::config::EngineConfig;
use remind_engine::engine::{ReminderEngine, StaticSettings};
use remind_engine::storage::InMemoryStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("REMIND_LOG_DIR").ok();
    let _guard = remind_engine::logging::init(log_dir.as_deref().map(Path::new))?;

    // Engine configuration, optionally from a JSON file
    let config = match std::env::var("REMIND_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<EngineConfig>(&raw)?
        }
        Err(_) => EngineConfig::default(),
    };

    let adapters = build_adapters();
    let settings = Arc::new(StaticSettings::new());
    let store = Arc::new(InMemoryStore::new());

    let engine = ReminderEngine::new(config, adapters, settings, store);
    engine.start().await?;
    info!("remind-engine initialized successfully");

    tokio::signal::ctrl_c().await?;
    engine.shutdown();

    Ok(())
}

/// Build the adapter set from environment variables. In-app delivery is
/// always available; the gateway-backed channels register only when their
/// endpoint is configured.
fn build_adapters() -> AdapterSet {
    let mut adapters = AdapterSet::new();
    adapters.register(Arc::new(InAppAdapter::new(256)));

    if let Ok(api_url) = std::env::var("MAIL_API_URL") {
        let to_addresses = std::env::var("MAIL_TO")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        adapters.register(Arc::new(EmailAdapter::new(EmailAdapterConfig {
            api_url,
            api_token: std::env::var("MAIL_API_TOKEN").ok(),
            from_address: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            to_addresses,
        })));
    }

    if let Ok(gateway_url) = std::env::var("PUSH_GATEWAY_URL") {
        adapters.register(Arc::new(PushAdapter::new(PushAdapterConfig {
            gateway_url,
            auth_token: std::env::var("PUSH_AUTH_TOKEN").ok(),
            subscription_id: std::env::var("PUSH_SUBSCRIPTION_ID").unwrap_or_default(),
        })));
    }

    if let (Ok(gateway_url), Ok(from_number), Ok(to_number)) = (
        std::env::var("SMS_GATEWAY_URL"),
        std::env::var("SMS_FROM"),
        std::env::var("SMS_TO"),
    ) {
        adapters.register(Arc::new(SmsAdapter::new(SmsAdapterConfig {
            gateway_url,
            api_key: std::env::var("SMS_API_KEY").ok(),
            from_number,
            to_number,
        })));
    }

    adapters
}
