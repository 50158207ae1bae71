use aether_core::shutdown::CancellationFlag;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = aether_core::cli::Cli::parse();

    if dotenvy::dotenv().is_err() {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match cli.command {
        // Default: run the pipeline until Ctrl-C
        None => {
            let config = aether_core::config::AppConfig::load()?;
            aether_core::run_pipeline(config, aether_core::RunOptions::default(), cancel).await
        }
        Some(cmd) => aether_core::cli::dispatch(cmd, cancel).await,
    }
}
