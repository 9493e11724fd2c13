// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tubequeue::config::{self, Settings};
use tubequeue::server::Server;

/// Download job server: queues submissions, supervises external worker
/// processes under a concurrency ceiling, and streams status over WebSocket.
#[derive(Parser)]
#[command(name = "tubequeue", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Address to bind to (use 0.0.0.0 to allow network access)
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Storage root for completed downloads
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Initial concurrency ceiling for simultaneous downloads
    #[arg(long, default_value_t = config::DEFAULT_LIMIT)]
    limit: usize,

    /// Worker program invoked per job
    #[arg(long, default_value = config::DEFAULT_WORKER)]
    worker: String,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tubequeue=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings {
        bind_address: cli.bind,
        port: cli.port,
        storage_dir: cli.storage_dir.unwrap_or_else(config::default_storage_dir),
        concurrency_limit: cli.limit.max(1),
        worker_program: cli.worker,
    };

    config::ensure_storage_dir(&settings.storage_dir)?;
    tracing::info!(
        storage = %settings.storage_dir.display(),
        limit = settings.concurrency_limit,
        worker = %settings.worker_program,
        "starting tubequeue"
    );

    Server::new(settings).start().await
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
