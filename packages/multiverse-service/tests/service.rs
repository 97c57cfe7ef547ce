use multiverse_domain::{NodeId, Point, SettingsPatch, Usage, projection};
use multiverse_service::{
	Error, ExplorerService, FocusMode, FocusStatus, FocusZoneRequest, SeedRequest,
};
use multiverse_testkit::Scripted;

fn service(scripted: &Scripted) -> ExplorerService {
	multiverse_testkit::memory_service(multiverse_testkit::test_config(), scripted)
}

fn square(x0: f64, y0: f64, size: f64) -> Vec<Point> {
	vec![
		Point::new(x0, y0),
		Point::new(x0 + size, y0),
		Point::new(x0 + size, y0 + size),
		Point::new(x0, y0 + size),
	]
}

async fn seed(service: &ExplorerService, prompt: &str) -> NodeId {
	service
		.seed(SeedRequest { prompt: prompt.to_string() })
		.await
		.expect("Failed to seed.")
		.seed_id
}

#[tokio::test]
async fn seed_creates_a_queued_root() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let mut updates = service.store.subscribe();
	let id = seed(&service, "Convince me to recycle.").await;
	let node = service.store.get(&id).await.expect("Failed to load.").expect("Seed must exist.");

	assert_eq!(node.depth, 0);
	assert_eq!(node.parent, None);
	assert_eq!(node.score, Some(0.5));
	assert_eq!(node.xy, projection::fallback_projection(&node.embedding));
	assert_eq!(service.store.priority(&id).await.expect("Failed to read priority."), Some(1.0));
	assert_eq!(updates.recv().await.expect("Seed must be announced.").id, id);
}

#[tokio::test]
async fn seed_outranks_existing_frontier() {
	let scripted = Scripted::new();
	let service = service(&scripted);

	service.store.push(&NodeId::from("busy"), 7.5).await.expect("Failed to push.");

	let id = seed(&service, "Another opening.").await;

	assert_eq!(service.store.priority(&id).await.expect("Failed to read priority."), Some(7.5));
}

#[tokio::test]
async fn blank_seed_prompt_is_rejected() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let err = service
		.seed(SeedRequest { prompt: "   ".to_string() })
		.await
		.expect_err("Blank prompt must be rejected.");

	match err {
		Error::InvalidRequest { fields, .. } => assert_eq!(fields, ["$.prompt"]),
		other => panic!("Unexpected error: {other:?}"),
	}
}

#[tokio::test]
async fn graph_and_conversation_reflect_the_store() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let id = seed(&service, "Hello there.").await;
	let graph = service.graph().await.expect("Failed to load graph.");

	assert_eq!(graph.len(), 1);
	assert_eq!(graph[0].id, id);
	assert_eq!(graph[0].parent, None);

	let conversation = service.conversation(&id).await.expect("Failed to load conversation.");

	assert_eq!(conversation.nodes_in_path, 1);
	assert_eq!(conversation.turns.len(), 1);
	assert_eq!(conversation.turns[0].content, "Hello there.");

	let err = service
		.conversation(&NodeId::from("missing"))
		.await
		.expect_err("Unknown node must be reported.");

	assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn empty_focus_zone_seeds_near_its_centroid() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let centroid = Point::new(2.5, 2.5);
	let response = service
		.focus_zone(FocusZoneRequest { poly: square(2.0, 2.0, 1.0), mode: FocusMode::Explore })
		.await
		.expect("Failed to apply focus zone.");

	assert_eq!(response.status, FocusStatus::Seeded);
	assert_eq!(response.nodes_affected, 1);

	let nodes = service.store.all().await.expect("Failed to load nodes.");

	assert_eq!(nodes.len(), 1);

	let seeded = &nodes[0];
	let projected = projection::fallback_projection(&seeded.embedding);

	assert_eq!(seeded.depth, 1);
	assert_eq!(seeded.parent, None);
	assert_eq!(seeded.xy, projected.blend(centroid, 0.5));
	assert!(seeded.xy.distance(centroid) <= projected.distance(centroid) / 2.0 + 1e-9);
	assert_eq!(service.store.priority(&seeded.id).await.expect("Failed to read."), Some(1.0));
}

#[tokio::test]
async fn occupied_focus_zone_boosts_queued_nodes() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let id = seed(&service, "Start here.").await;
	let node = service.store.get(&id).await.expect("Failed to load.").expect("Seed must exist.");
	let zone = square(node.xy.x - 0.5, node.xy.y - 0.5, 1.0);

	for mode in [FocusMode::Explore, FocusMode::Explore, FocusMode::Extend] {
		let response = service
			.focus_zone(FocusZoneRequest { poly: zone.clone(), mode })
			.await
			.expect("Failed to apply focus zone.");

		assert_eq!(response.status, FocusStatus::Boosted);
		assert_eq!(response.nodes_affected, 1);
	}

	let priority = service.store.priority(&id).await.expect("Failed to read priority.");

	assert_eq!(priority, Some(1.0 * 2.0 * 2.0 * 1.5));
}

#[tokio::test]
async fn degenerate_polygon_is_rejected() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let line = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)];
	let err = service
		.focus_zone(FocusZoneRequest { poly: line, mode: FocusMode::Extend })
		.await
		.expect_err("Zero-area polygon must be rejected.");

	match err {
		Error::InvalidRequest { fields, .. } => assert_eq!(fields, ["$.poly"]),
		other => panic!("Unexpected error: {other:?}"),
	}
	assert_eq!(service.store.count().await.expect("Failed to count."), 0);
}

#[tokio::test]
async fn settings_patch_changes_only_given_fields() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let before = service.settings().await.expect("Failed to load settings.");
	let after = service
		.patch_settings(SettingsPatch { lambda_depth: Some(0.2), ..Default::default() })
		.await
		.expect("Failed to patch settings.");

	assert_eq!(after.lambda_depth, 0.2);
	assert_eq!(after.lambda_trend, before.lambda_trend);
	assert_eq!(after.lambda_sim, before.lambda_sim);
	assert_eq!(after.budget_usd, before.budget_usd);
	assert_eq!(after.version, before.version + 1);
}

#[tokio::test]
async fn invalid_settings_name_their_fields() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let patch = SettingsPatch {
		lambda_sim: Some(-1.0),
		budget_usd: Some(f64::INFINITY),
		..Default::default()
	};

	match service.patch_settings(patch).await {
		Err(Error::InvalidRequest { fields, .. }) =>
			assert_eq!(fields, ["$.lambda_sim", "$.budget_usd"]),
		other => panic!("Unexpected result: {other:?}"),
	}
	assert!(service.patch_settings(SettingsPatch::default()).await.is_err());
	assert_eq!(service.settings().await.expect("Failed to load settings.").version, 1);
}

#[tokio::test]
async fn usage_reports_throttling_against_live_ceiling() {
	let scripted = Scripted::new();
	let service = service(&scripted);

	service
		.store
		.add_usage(Usage { prompt_tokens: 100, completion_tokens: 50, cost: 5.01 })
		.await
		.expect("Failed to add usage.");

	let report = service.usage().await.expect("Failed to read usage.");

	assert_eq!(report.total_cost, 5.01);
	assert_eq!(report.ceiling_usd, 5.0);
	assert!(report.throttled);

	service
		.patch_settings(SettingsPatch { budget_usd: Some(10.0), ..Default::default() })
		.await
		.expect("Failed to raise ceiling.");

	assert!(!service.usage().await.expect("Failed to read usage.").throttled);
}

#[tokio::test]
async fn refit_requires_minimum_corpus_then_reprojects() {
	let scripted = Scripted::new();
	let service = service(&scripted);

	seed(&service, "one").await;

	assert!(matches!(service.refit().await, Err(Error::InvalidRequest { .. })));
	assert!(service.refit_if_needed().await.expect("Failed to check refit.").is_none());

	seed(&service, "two").await;
	seed(&service, "three").await;

	let report = service
		.refit_if_needed()
		.await
		.expect("Failed to refit.")
		.expect("Three nodes reach the minimum corpus.");

	assert_eq!(report.corpus_size, 3);
	assert_eq!(report.reprojected, 3);

	let model = service
		.store
		.load_projection()
		.await
		.expect("Failed to load projection.")
		.expect("Model must be persisted.");

	for node in service.store.all().await.expect("Failed to load nodes.") {
		assert_eq!(node.xy, model.project(&node.embedding));
	}

	assert!(service.refit_if_needed().await.expect("Failed to check refit.").is_none());
}

#[tokio::test]
async fn collaborator_calls_accrue_usage() {
	let scripted = Scripted::new();
	let service = service(&scripted);
	let (variants, usage) =
		service.mutate(&[], 2).await.expect("Scripted mutator must succeed.");

	assert_eq!(variants.len(), 2);
	assert_eq!(service.store.usage().await.expect("Failed to read usage."), usage);
}
