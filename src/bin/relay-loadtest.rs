use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vllm_model_relay::{
    backend::http::HttpBackend,
    config::RelayConfig,
    harness::{self, HarnessConfig, PromptPool},
    relay::CompletionRelay,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vllm_model_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let relay_config = RelayConfig::from_env()?;
    let config = HarnessConfig::from_env(&relay_config.registry)?;

    // Callers share one connection pool sized for the whole run.
    let backend = Arc::new(HttpBackend::new(
        config.concurrency.max(relay_config.max_inflight),
    )?);
    let relay = Arc::new(CompletionRelay::new(&relay_config, backend));

    let stats = harness::run(relay, &config, Arc::new(PromptPool::default())).await;
    stats.log_summary();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if stats.lost() > 0 {
        return Err(format!("{} calls were never recorded", stats.lost()).into());
    }
    Ok(())
}
