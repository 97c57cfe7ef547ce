pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
	/// Content flagged by the moderation endpoint. Never retried and never billed.
	#[error("Content violates moderation policy ({categories}).")]
	Moderation { categories: String },
}
impl Error {
	pub fn is_moderation(&self) -> bool {
		matches!(self, Self::Moderation { .. })
	}
}
