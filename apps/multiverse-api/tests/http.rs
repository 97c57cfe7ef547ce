use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use multiverse_api::{routes, state::AppState};
use multiverse_testkit::Scripted;

fn app_state() -> AppState {
	let service =
		multiverse_testkit::memory_service(multiverse_testkit::test_config(), &Scripted::new());

	AppState::from_service(service)
}

fn json_request(method: &str, uri: &str, payload: &Value) -> Request<Body> {
	Request::builder()
		.method(method)
		.uri(uri)
		.header("content-type", "application/json")
		.body(Body::from(payload.to_string()))
		.expect("Failed to build request.")
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).expect("Failed to build request.")
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
	let response = app.clone().oneshot(request).await.expect("Failed to call router.");
	let status = response.status();
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json = if body.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&body).expect("Failed to parse response.")
	};

	(status, json)
}

#[tokio::test]
async fn health_ok() {
	let state = app_state();
	let app = routes::router(state.clone());
	let _ = routes::admin_router(state);
	let (status, _) = call(&app, get("/health")).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn seeded_prompt_appears_in_graph_as_root() {
	let app = routes::router(app_state());
	let (status, seeded) = call(
		&app,
		json_request("POST", "/v1/seed", &serde_json::json!({ "prompt": "Where do rivers end?" })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);

	let seed_id = seeded["seed_id"].as_str().expect("Missing seed_id.").to_string();
	let (status, graph) = call(&app, get("/v1/graph")).await;

	assert_eq!(status, StatusCode::OK);

	let nodes = graph.as_array().expect("Graph must be an array.");

	assert_eq!(nodes.len(), 1);
	assert_eq!(nodes[0]["id"], seed_id.as_str());
	assert!(nodes[0]["parent"].is_null());
	assert_eq!(nodes[0]["xy"].as_array().map(Vec::len), Some(2));

	let (status, conversation) = call(&app, get(&format!("/v1/conversation/{seed_id}"))).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(conversation["depth"], 0);
	assert_eq!(conversation["nodes_in_path"], 1);
	assert_eq!(conversation["turns"][0]["role"], "user");
	assert_eq!(conversation["turns"][0]["content"], "Where do rivers end?");
}

#[tokio::test]
async fn blank_seed_names_the_field() {
	let app = routes::router(app_state());
	let (status, body) =
		call(&app, json_request("POST", "/v1/seed", &serde_json::json!({ "prompt": "  " }))).await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "INVALID_REQUEST");
	assert_eq!(body["fields"][0], "$.prompt");
}

#[tokio::test]
async fn malformed_body_is_invalid_request() {
	let app = routes::router(app_state());
	let request = Request::builder()
		.method("POST")
		.uri("/v1/seed")
		.header("content-type", "application/json")
		.body(Body::from("{\"prompt\": "))
		.expect("Failed to build request.");
	let (status, body) = call(&app, request).await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "INVALID_REQUEST");

	let (status, body) =
		call(&app, json_request("POST", "/v1/focus_zone", &serde_json::json!({ "poly": [] })))
			.await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "INVALID_REQUEST");
	assert!(body["message"].as_str().is_some_and(|message| message.contains("mode")));
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
	let app = routes::router(app_state());
	let (status, body) = call(&app, get("/v1/conversation/missing")).await;

	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn empty_focus_zone_seeds_a_node() {
	let app = routes::router(app_state());
	let payload = serde_json::json!({
		"poly": [[2.0, 2.0], [3.0, 2.0], [3.0, 3.0], [2.0, 3.0]],
		"mode": "explore"
	});
	let (status, body) = call(&app, json_request("POST", "/v1/focus_zone", &payload)).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, serde_json::json!({ "status": "seeded", "nodes_affected": 1 }));

	let (_, graph) = call(&app, get("/v1/graph")).await;

	assert_eq!(graph.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn degenerate_focus_zone_is_rejected() {
	let app = routes::router(app_state());
	let payload = serde_json::json!({ "poly": [[0.0, 0.0], [1.0, 1.0]], "mode": "extend" });
	let (status, body) = call(&app, json_request("POST", "/v1/focus_zone", &payload)).await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["fields"][0], "$.poly");
}

#[tokio::test]
async fn settings_patch_bumps_version() {
	let app = routes::router(app_state());
	let (status, before) = call(&app, get("/v1/settings")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(before["version"], 1);

	let (status, after) = call(
		&app,
		json_request("PATCH", "/v1/settings", &serde_json::json!({ "lambda_sim": 0.25 })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(after["version"], 2);
	assert_eq!(after["lambda_sim"], 0.25);
	assert_eq!(after["lambda_trend"], before["lambda_trend"]);

	let (_, reread) = call(&app, get("/v1/settings")).await;

	assert_eq!(reread, after);
}

#[tokio::test]
async fn settings_patch_reports_invalid_fields() {
	let app = routes::router(app_state());
	let payload = serde_json::json!({ "lambda_depth": -1.0, "budget_usd": 2.0 });
	let (status, body) = call(&app, json_request("PATCH", "/v1/settings", &payload)).await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "INVALID_REQUEST");
	assert_eq!(body["fields"], serde_json::json!(["$.lambda_depth"]));

	let (_, settings) = call(&app, get("/v1/settings")).await;

	assert_eq!(settings["version"], 1);
}

#[tokio::test]
async fn usage_reports_ceiling() {
	let app = routes::router(app_state());
	let (status, body) = call(&app, get("/v1/usage")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["total_cost"], 0.0);
	assert_eq!(body["throttled"], false);

	let (_, settings) = call(&app, get("/v1/settings")).await;

	assert_eq!(body["ceiling_usd"], settings["budget_usd"]);
}

#[tokio::test]
async fn refit_needs_a_minimum_corpus() {
	let state = app_state();
	let app = routes::router(state.clone());
	let admin = routes::admin_router(state);
	let refit = || {
		Request::builder()
			.method("POST")
			.uri("/v1/admin/projection/refit")
			.body(Body::empty())
			.expect("Failed to build request.")
	};
	let (status, body) = call(&admin, refit()).await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "INVALID_REQUEST");

	for prompt in ["First question.", "Second question.", "Third question."] {
		let (status, _) =
			call(&app, json_request("POST", "/v1/seed", &serde_json::json!({ "prompt": prompt })))
				.await;

		assert_eq!(status, StatusCode::OK);
	}

	let (status, body) = call(&admin, refit()).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["corpus_size"], 3);
	assert_eq!(body["reprojected"], 3);
}
