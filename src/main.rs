use std::{path::PathBuf, sync::Arc};

use arrebol_worker::{
    Coordinator, DockerClient, Worker, WorkerConfig,
    worker::{config::DEFAULT_CONFIG_PATH, types::WorkerResult},
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arrebol-worker", about = "Runs arrebol tasks in containers")]
struct Args {
    /// Worker configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Process at most one task, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> WorkerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = WorkerConfig::load(&args.config)?;
    tracing::info!(worker_id = %config.id, endpoint = %config.endpoint(), "Starting worker");

    let docker = Arc::new(DockerClient::new(config.docker_host.as_deref())?);
    let coordinator = Arc::new(Coordinator::new(
        reqwest::Client::new(),
        config.endpoint(),
        config.id.clone(),
        config.queue_id.clone(),
    ));
    let mut worker = Worker::new(config, coordinator, docker);

    if args.once {
        match worker.run_once().await? {
            Some(state) => tracing::info!(state = ?state, "Task processed"),
            None => tracing::info!("No task available"),
        }
        return Ok(());
    }

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping worker");
        }
    }

    Ok(())
}
