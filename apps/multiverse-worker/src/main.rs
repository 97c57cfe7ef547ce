use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = multiverse_worker::Args::parse();

	multiverse_worker::run(args).await
}
