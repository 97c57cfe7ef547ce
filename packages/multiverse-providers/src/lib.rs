pub mod chat;
pub mod critic;
pub mod embedding;
pub mod moderation;
pub mod mutator;
pub mod responder;

mod error;

pub use error::{Error, Result};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde_json::{Map, Value};

use multiverse_domain::{Role, Turn};

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Renders turns as a labelled transcript for collaborators that read the dialogue as text.
pub fn transcript(turns: &[Turn]) -> String {
	turns
		.iter()
		.map(|turn| {
			let label = match turn.role {
				Role::User => "User",
				Role::Assistant => "Assistant",
			};

			format!("{label}: {}", turn.content)
		})
		.collect::<Vec<_>>()
		.join("\n\n")
}
