//! Headless server binary.
//!
//! Exit codes: 0 normal, 1 configuration error, 2 bus unavailable,
//! 3 key-value store unavailable, 130 signal termination.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agentos::config::{default_config_path, load_config};
use agentos::error::Error;
use agentos::runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "agentos", about = "Multi-tenant agent orchestration platform")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::Bus(_) | Error::CircuitOpen { .. } => 2,
        Error::Kv(_) => 3,
        _ => 1,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };
    if cli.check {
        println!("configuration ok: {}", config_path.display());
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("runtime error: {err}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(async move {
        let platform = match Runtime::start(config).await {
            Ok(platform) => platform,
            Err(err) => {
                eprintln!("startup failed: {err}");
                return ExitCode::from(exit_code_for(&err));
            }
        };

        let signalled = wait_for_shutdown_signal().await;
        platform.shutdown().await;
        if signalled {
            ExitCode::from(130)
        } else {
            ExitCode::SUCCESS
        }
    })
}

/// Wait for SIGINT or SIGTERM. Returns `true` when a signal arrived.
async fn wait_for_shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::error!("cannot install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
                return true;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = term.recv() => true,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        true
    }
}
