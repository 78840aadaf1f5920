use tracing_subscriber::EnvFilter;

use vigil_engine::{cli, config, run};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let args = cli::parse();
    let config = config::load_from_file(&args.config_path)?;

    tracing::info!("vigild starting");
    run::run(config).await
}
