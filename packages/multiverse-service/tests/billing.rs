use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use axum::{Json, Router, extract::State, http::StatusCode, routing};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot};

use multiverse_domain::Turn;
use multiverse_service::ExplorerService;
use multiverse_storage::{MemoryStore, Store};

/// Answers every chat call with 1000 prompt and 1000 completion tokens, except the calls whose
/// arrival index is listed in `failing`.
#[derive(Clone)]
struct ChatStub {
	calls: Arc<AtomicUsize>,
	failing: Arc<Vec<usize>>,
}

async fn chat_handler(State(stub): State<ChatStub>) -> (StatusCode, Json<Value>) {
	let call = stub.calls.fetch_add(1, Ordering::SeqCst);

	if stub.failing.contains(&call) {
		return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "bad request" })));
	}

	(
		StatusCode::OK,
		Json(serde_json::json!({
			"choices": [{ "message": { "content": format!("variant {call}") } }],
			"usage": { "prompt_tokens": 1000, "completion_tokens": 1000 }
		})),
	)
}

async fn start_chat_stub(stub: ChatStub) -> (String, oneshot::Sender<()>) {
	let app =
		Router::new().route("/chat/completions", routing::post(chat_handler)).with_state(stub);
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind chat stub.");
	let addr = listener.local_addr().expect("Failed to read chat stub address.");
	let (tx, rx) = oneshot::channel();
	let server = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = rx.await;
	});

	tokio::spawn(async move {
		let _ = server.await;
	});

	(format!("http://{addr}"), tx)
}

/// A memory-backed service whose mutator talks to the stub at `api_base` and pays $1 per 1k
/// tokens in each direction.
fn http_mutator_service(api_base: String) -> ExplorerService {
	let mut cfg = multiverse_testkit::test_config();
	let mutator = &mut cfg.providers.mutator;

	mutator.api_base = api_base;
	mutator.path = "/chat/completions".to_string();
	mutator.max_attempts = 1;
	mutator.input_usd_per_1k = 1.0;
	mutator.output_usd_per_1k = 1.0;

	let store =
		Store::Memory(MemoryStore::new(cfg.storage.vector_dim, cfg.storage.fanout_capacity));

	ExplorerService::new(cfg, store)
}

#[tokio::test]
async fn failed_mutator_call_keeps_the_cost_of_its_siblings() {
	let stub = ChatStub { calls: Arc::new(AtomicUsize::new(0)), failing: Arc::new(vec![2]) };
	let (api_base, shutdown) = start_chat_stub(stub.clone()).await;
	let service = http_mutator_service(api_base);
	let dialogue = [Turn::user("Pick a city."), Turn::assistant("Lisbon.")];
	let (variants, usage) = service.mutate(&dialogue, 3).await.expect("Two calls succeeded.");

	assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
	assert_eq!(variants.len(), 2);
	assert_eq!(usage.prompt_tokens, 2000);
	assert!((usage.cost - 4.0).abs() < 1e-9);

	let totals = service.store.usage().await.expect("Failed to read usage.");

	assert_eq!(totals.prompt_tokens, 2000);
	assert_eq!(totals.completion_tokens, 2000);
	assert!((totals.cost - 4.0).abs() < 1e-9);

	let _ = shutdown.send(());
}

#[tokio::test]
async fn mutator_fails_only_when_every_call_fails() {
	let stub = ChatStub { calls: Arc::new(AtomicUsize::new(0)), failing: Arc::new(vec![0, 1]) };
	let (api_base, shutdown) = start_chat_stub(stub).await;
	let service = http_mutator_service(api_base);
	let err = service.mutate(&[], 2).await.expect_err("Every call failed.");

	assert!(err.is_collaborator());
	assert_eq!(service.store.usage().await.expect("Failed to read usage.").cost, 0.0);

	let _ = shutdown.send(());
}
