use axum::{
	Json, Router,
	extract::{
		Path, State,
		rejection::JsonRejection,
		ws::{Message, WebSocket, WebSocketUpgrade},
	},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;
use multiverse_domain::{GraphUpdate, NodeId, SchedulerSettings, SettingsPatch};
use multiverse_service::{
	ConversationResponse, FocusZoneRequest, FocusZoneResponse, RefitReport, SeedRequest,
	SeedResponse, UsageReport,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/seed", post(seed))
		.route("/v1/graph", get(graph))
		.route("/v1/conversation/{id}", get(conversation))
		.route("/v1/focus_zone", post(focus_zone))
		.route("/v1/settings", get(settings).patch(patch_settings))
		.route("/v1/usage", get(usage))
		.route("/v1/stream", get(stream))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new().route("/v1/admin/projection/refit", post(refit_projection)).with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn seed(
	State(state): State<AppState>,
	payload: Result<Json<SeedRequest>, JsonRejection>,
) -> Result<Json<SeedResponse>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.seed(payload).await?;

	Ok(Json(response))
}

async fn graph(State(state): State<AppState>) -> Result<Json<Vec<GraphUpdate>>, ApiError> {
	Ok(Json(state.service.graph().await?))
}

async fn conversation(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
	let response = state.service.conversation(&NodeId::new(id)).await?;

	Ok(Json(response))
}

async fn focus_zone(
	State(state): State<AppState>,
	payload: Result<Json<FocusZoneRequest>, JsonRejection>,
) -> Result<Json<FocusZoneResponse>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.focus_zone(payload).await?;

	Ok(Json(response))
}

async fn settings(State(state): State<AppState>) -> Result<Json<SchedulerSettings>, ApiError> {
	Ok(Json(state.service.settings().await?))
}

async fn patch_settings(
	State(state): State<AppState>,
	payload: Result<Json<SettingsPatch>, JsonRejection>,
) -> Result<Json<SchedulerSettings>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.patch_settings(payload).await?;

	Ok(Json(response))
}

async fn usage(State(state): State<AppState>) -> Result<Json<UsageReport>, ApiError> {
	Ok(Json(state.service.usage().await?))
}

async fn refit_projection(State(state): State<AppState>) -> Result<Json<RefitReport>, ApiError> {
	Ok(Json(state.service.refit().await?))
}

async fn stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
	ws.on_upgrade(move |socket| relay_updates(socket, state))
}

/// Forwards graph updates to one observer until either side goes away. Client frames are
/// ignored apart from close.
async fn relay_updates(mut socket: WebSocket, state: AppState) {
	let mut updates = state.service.store.subscribe();

	tracing::debug!("Observer connected.");

	loop {
		tokio::select! {
			update = updates.recv() => match update {
				Ok(update) => {
					let json = match serde_json::to_string(&update) {
						Ok(json) => json,
						Err(err) => {
							tracing::warn!(error = %err, "Failed to encode graph update.");

							continue;
						},
					};

					if socket.send(Message::Text(json.into())).await.is_err() {
						break;
					}
				},
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Observer fell behind. Oldest updates dropped.");
				},
				Err(RecvError::Closed) => break,
			},
			incoming = socket.recv() => match incoming {
				Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
				Some(Ok(_)) => {},
			},
		}
	}

	tracing::debug!("Observer disconnected.");
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
	pub error_code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub error_code: String,
	pub message: String,
	pub fields: Option<Vec<String>>,
}
impl ApiError {
	pub fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}

impl From<multiverse_service::Error> for ApiError {
	fn from(err: multiverse_service::Error) -> Self {
		use multiverse_service::Error;

		match err {
			Error::InvalidRequest { message, fields } => Self::new(
				StatusCode::UNPROCESSABLE_ENTITY,
				"INVALID_REQUEST",
				message,
				(!fields.is_empty()).then_some(fields),
			),
			Error::NotFound { message } =>
				Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
			Error::Conflict { message } =>
				Self::new(StatusCode::CONFLICT, "CONFLICT", message, None),
			Error::ContentRejected { message } =>
				Self::new(StatusCode::UNPROCESSABLE_ENTITY, "CONTENT_REJECTED", message, None),
			Error::Provider { message } => {
				tracing::error!(error = %message, "Collaborator call failed.");

				Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message, None)
			},
			Error::Storage { message } => {
				tracing::error!(error = %message, "Storage call failed.");

				Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR", message, None)
			},
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST", rejection.body_text(), None)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}
