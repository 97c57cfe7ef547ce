pub mod worker;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use color_eyre::eyre;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use multiverse_config::StorageBackend;
use multiverse_service::ExplorerService;
use multiverse_storage::Store;

#[derive(Debug, Parser)]
#[command(
	version = multiverse_cli::VERSION,
	rename_all = "kebab",
	styles = multiverse_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = multiverse_config::load(&args.config)?;

	init_tracing(&config);

	if config.storage.backend == StorageBackend::Memory {
		return Err(eyre::eyre!(
			"The memory backend is process-local. Run the worker embedded in the API instead."
		));
	}

	let store = Store::open(&config).await?;
	let service = Arc::new(ExplorerService::new(config, store));
	let (shutdown_tx, shutdown_rx) = watch::channel(false);

	tokio::spawn(async move {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %err, "Failed to listen for shutdown signal.");

			// Keep the sender alive so receivers do not read a closed channel as shutdown.
			std::future::pending::<()>().await;
		}

		tracing::info!("Shutdown requested. Finishing the current cycle.");

		let _ = shutdown_tx.send(true);
	});

	let heartbeat = worker::spawn_heartbeat(service.clone(), shutdown_rx.clone());

	worker::run_worker(service, shutdown_rx).await;

	heartbeat.await?;

	Ok(())
}

fn init_tracing(config: &multiverse_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
