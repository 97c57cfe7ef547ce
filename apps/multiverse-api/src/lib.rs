pub mod routes;
pub mod state;

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use color_eyre::eyre;
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

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

	let http_addr: SocketAddr = config.service.http_bind.parse()?;
	let admin_addr: SocketAddr = config.service.admin_bind.parse()?;

	if !admin_addr.ip().is_loopback() {
		return Err(eyre::eyre!("admin_bind must be a loopback address."));
	}

	let embedded = config.worker.embedded;
	let state = AppState::new(config).await?;
	let relay = state.service.store.spawn_relay();
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let workers = embedded.then(|| {
		tracing::info!("Running the expansion worker in-process.");

		(
			tokio::spawn(multiverse_worker::worker::run_worker(
				state.service.clone(),
				shutdown_rx.clone(),
			)),
			multiverse_worker::worker::spawn_heartbeat(state.service.clone(), shutdown_rx.clone()),
		)
	});
	let app = routes::router(state.clone());
	let admin_app = routes::admin_router(state);
	let http_listener = TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	let http_server =
		axum::serve(http_listener, app).with_graceful_shutdown(stopped(shutdown_rx.clone()));
	let admin_listener = TcpListener::bind(admin_addr).await?;

	tracing::info!(%admin_addr, "Admin server listening.");

	let admin_server =
		axum::serve(admin_listener, admin_app).with_graceful_shutdown(stopped(shutdown_rx));

	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				tracing::info!("Shutdown requested.");

				let _ = shutdown_tx.send(true);
			},
			Err(err) => {
				tracing::error!(error = %err, "Failed to listen for shutdown signal.");

				std::future::pending::<()>().await;
			},
		}
	});

	tokio::try_join!(http_server, admin_server)?;

	if let Some((worker, heartbeat)) = workers {
		worker.await?;
		heartbeat.await?;
	}
	if let Some(relay) = relay {
		relay.abort();
	}

	Ok(())
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
	// An Err means the sender is gone, which only happens once the process is exiting.
	let _ = shutdown.wait_for(|stop| *stop).await;
}

fn init_tracing(config: &multiverse_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
