use std::sync::Arc;

use multiverse_service::ExplorerService;
use multiverse_storage::Store;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<ExplorerService>,
}
impl AppState {
	pub async fn new(config: multiverse_config::Config) -> color_eyre::Result<Self> {
		let store = Store::open(&config).await?;
		let service = ExplorerService::new(config, store);

		Ok(Self { service: Arc::new(service) })
	}

	pub fn from_service(service: ExplorerService) -> Self {
		Self { service: Arc::new(service) }
	}
}
