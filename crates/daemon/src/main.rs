// SPDX-License-Identifier: MIT

//! quaerod: run the Quaero job execution engine until interrupted.
//!
//! Usage: `quaerod [--config /etc/quaero/quaero.toml]`

use quaero_engine::{Engine, EngineConfig, EngineDeps};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn parse_config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => return args.next().map(PathBuf::from),
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: quaerod [--config <path>]");
                std::process::exit(2);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match parse_config_path() {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = match Engine::in_memory(config, EngineDeps::default()) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "engine construction failed");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = engine.start().await {
        tracing::error!(error = %e, "engine startup failed");
        return ExitCode::FAILURE;
    }
    tracing::info!("quaerod ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "signal listener failed");
    }
    engine.shutdown().await;
    tracing::info!("quaerod stopped");
    ExitCode::SUCCESS
}
