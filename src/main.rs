use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trust_layer::api::AnalyzeService;
use trust_layer::config::Config;
use trust_layer::server::{create_app, AppState};

#[derive(Parser)]
#[command(author, version, about = "Trust Layer analysis backend")]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// PDF output directory (overrides OUTPUT_DIR)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    config
        .ensure_directories_exist()
        .await
        .context("creating PDF output directory")?;

    let port = config.port;
    let output_dir = config.output_dir.clone();
    let jira_configured = config.jira.is_some();

    let service = AnalyzeService::new(config).context("building analysis service")?;
    let app = create_app(AppState {
        service: Arc::new(service),
    });

    info!(output_dir = %output_dir.display(), jira_configured, "Trust Layer starting");

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!("Trust Layer running on port {port}");

    axum::serve(listener, app).await?;
    Ok(())
}
