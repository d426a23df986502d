use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::AiClient;
use sentrycore_common::Config;
use sentrycore_engine::{
    tick, Deps, EmailBackend, Engine, LlmJudge, NoopBackend, SmtpBackend,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sentrycore=info".parse()?))
        .init();

    info!("SentryCore engine starting...");

    let config = Config::engine_from_env();
    config.log_redacted();

    let client = AiClient::new(&config.ai_api_key, &config.ai_base_url)
        .with_chat_model(&config.judge_model)
        .with_embedding_model(&config.embedding_model);
    let judge = Arc::new(LlmJudge::new(client.clone()));

    let email_backend: Arc<dyn EmailBackend> = if config.smtp_host.is_empty() {
        info!("SMTP_HOST not set, using noop email backend");
        Arc::new(NoopBackend)
    } else {
        Arc::new(SmtpBackend::new(
            &config.smtp_host,
            config.smtp_port,
            &config.smtp_username,
            &config.smtp_password,
            &config.email_from,
        )?)
    };

    let (deps, _store) = Deps::in_memory();
    let engine = Arc::new(Engine::new(
        &config,
        deps,
        Arc::new(client),
        judge,
        email_backend,
    ));

    let handles = tick::spawn_all(engine, tick::TickIntervals::default());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
