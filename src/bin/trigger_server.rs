use ev_elt::config::cloud::CloudConfig;
use ev_elt::trigger::{router, TriggerState};
use ev_elt::utils::logger;
use ev_elt::utils::validation::Validate;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init_cloud_logger();

    let config = CloudConfig::from_env()?;
    // 設定錯誤時直接結束，不對外提供服務
    config.validate()?;

    let client = config.s3_client().await;
    let state = TriggerState {
        config: Arc::new(config),
        client,
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("🚀 Trigger server listening on port {}", port);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
