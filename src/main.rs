use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,llm_failover_router=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = llm_failover_router::config::RouterConfig::from_env();
    let state = llm_failover_router::build_state(&config)?;
    let app = llm_failover_router::build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "router listening");

    axum::serve(listener, app).await?;
    Ok(())
}
