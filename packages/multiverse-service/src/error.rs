pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String, fields: Vec<String> },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Content rejected: {message}")]
	ContentRejected { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	pub fn invalid(message: impl Into<String>, field: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into(), fields: vec![field.into()] }
	}

	/// Failures of an external collaborator call. Expansion skips the affected child.
	pub fn is_collaborator(&self) -> bool {
		matches!(self, Self::ContentRejected { .. } | Self::Provider { .. })
	}
}

impl From<multiverse_storage::Error> for Error {
	fn from(err: multiverse_storage::Error) -> Self {
		match err {
			multiverse_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			multiverse_storage::Error::Serde(inner) => Self::Storage { message: inner.to_string() },
			multiverse_storage::Error::InvalidArgument(message) =>
				Self::InvalidRequest { message, fields: Vec::new() },
			multiverse_storage::Error::Conflict(message) => Self::Conflict { message },
		}
	}
}

impl From<multiverse_providers::Error> for Error {
	fn from(err: multiverse_providers::Error) -> Self {
		match err {
			multiverse_providers::Error::Moderation { categories } => Self::ContentRejected {
				message: format!("Content flagged by moderation: {categories}."),
			},
			other => Self::Provider { message: other.to_string() },
		}
	}
}
