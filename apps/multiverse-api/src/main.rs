use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = multiverse_api::Args::parse();

	multiverse_api::run(args).await
}
