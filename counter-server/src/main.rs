//! counter-server binary entry point.
//!
//! Usage:
//! ```bash
//! counter-server --config counter.toml
//! counter-server --bind 127.0.0.1:8080
//! counter-server --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use counter_server::config::Config;
use counter_server::shutdown::{install_panic_hook, wait_for_signal, ShutdownTrigger};
use counter_server::{app, store};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "counter.toml";

/// Shared live counter server.
#[derive(Debug, Parser)]
#[command(name = "counter-server", version, about)]
struct Cli {
    /// Path to the TOML configuration file (default: counter.toml if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => Config::from_file(Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind_address = bind.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(&cli).context("failed to load configuration")?;

    let store = store::open(&config.store)
        .await
        .context("failed to open store")?;

    let trigger = ShutdownTrigger::new();
    install_panic_hook(trigger.clone());

    let handle = app::start(config, store, trigger.clone())
        .await
        .context("failed to start server")?;

    let cause = tokio::select! {
        cause = wait_for_signal() => cause,
        cause = trigger.wait() => cause,
    };

    let report = handle.shutdown(cause).await;
    if report.timed_out {
        tracing::error!("Forcing server shutdown");
        std::process::exit(1);
    }
    Ok(report.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
