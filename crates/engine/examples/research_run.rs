//! Boots the engine against an OpenAI-compatible endpoint and runs one
//! research request end to end, printing bus events as JSON lines.
//!
//! ```sh
//! RT_ENDPOINT_URL=http://127.0.0.1:8000/v1/chat/completions \
//! RT_MODEL=my-model RT_API_KEY=sk-... \
//! cargo run -p rt-engine --example research_run -- "Summarize the history of Rust"
//! ```

use std::sync::Arc;

use rt_domain::config::{Config, LlmConfig};
use rt_engine::llm::ProviderMap;
use rt_engine::{Run, RunContext, RunEvent, ToolRegistry};
use rt_profiles::ProfileStore;

#[tokio::main]
async fn main() -> rt_domain::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Summarize the current state of async Rust".into());

    let mut config = Config::default();
    config.engine.apply_env();
    config.llm.insert(
        "default".into(),
        LlmConfig {
            endpoint_url: std::env::var("RT_ENDPOINT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/v1/chat/completions".into()),
            model: std::env::var("RT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            api_key: std::env::var("RT_API_KEY").ok(),
            timeout_ms: 120_000,
            max_retries: 3,
        },
    );
    let config = Arc::new(config);

    let profiles = Arc::new(ProfileStore::load(std::path::Path::new("profiles"))?);
    let providers = Arc::new(ProviderMap::from_config(&config)?);
    let ctx = RunContext::new(
        config,
        profiles,
        Arc::new(ToolRegistry::with_builtins()),
        providers,
    );

    let mut events = ctx.bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{line}");
            }
            if matches!(ev, RunEvent::RunEnd { .. }) {
                break;
            }
        }
    });

    let handle = Run::start(ctx.clone(), "principal", &prompt)?;
    let termination = handle.wait().await;
    let _ = printer.await;

    let report = ctx.team.with(|root| {
        root["shared_context"]["final_report"]
            .as_str()
            .map(String::from)
    });
    if let Some(report) = report {
        println!("\n{report}");
    }
    tracing::info!(?termination, "run finished");
    Ok(())
}
