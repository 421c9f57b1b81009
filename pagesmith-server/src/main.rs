use anyhow::Result;
use clap::Parser;
use pagesmith_server::config::ServiceConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    // Use JSON logs in production (PAGESMITH_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PAGESMITH_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pagesmith_server=info,pagesmith_core=info,tower_http=info"));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServiceConfig::parse();
    tracing::info!(
        owner = %config.github_owner,
        api = %config.github_api_base,
        model = %config.model,
        "Starting pagesmith"
    );

    let state = pagesmith_server::build_state(&config)?;
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    pagesmith_server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    })
    .await
}
