use std::collections::HashSet;

use multiverse_domain::{
	GraphUpdate, Node, NodeId, Point, ProjectionModel, SchedulerSettings, SettingsPatch, Usage,
};
use multiverse_storage::{Error, MemoryStore, Store};

const DIM: u32 = 4;

fn store() -> Store {
	Store::Memory(MemoryStore::new(DIM, 16))
}

fn node(id: &str, depth: u32, parent: Option<&str>) -> Node {
	let embedding = vec![0.25; DIM as usize];

	Node::new(NodeId::from(id), format!("prompt {id}"), depth, parent.map(NodeId::from), embedding)
}

fn defaults() -> SchedulerSettings {
	SchedulerSettings {
		lambda_trend: 0.3,
		lambda_sim: 0.2,
		lambda_depth: 0.05,
		budget_usd: 5.0,
		version: 1,
	}
}

#[tokio::test]
async fn saved_node_reads_back_identically() {
	let store = store();
	let mut root = node("root", 0, None);

	root.reply = Some("hello".to_string());
	root.score = Some(0.5);
	root.xy = Point::new(1.0, -2.0);

	store.save(&root).await.expect("Failed to save root.");

	let loaded = store.get(&root.id).await.expect("Failed to load root.");

	assert_eq!(loaded, Some(root));
	assert_eq!(store.count().await.expect("Failed to count."), 1);
}

#[tokio::test]
async fn rejects_child_with_wrong_depth() {
	let store = store();

	store.save(&node("root", 0, None)).await.expect("Failed to save root.");

	let err =
		store.save(&node("child", 2, Some("root"))).await.expect_err("Depth must be checked.");

	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn rejects_child_of_unknown_parent() {
	let store = store();
	let err = store.save(&node("orphan", 1, Some("ghost"))).await.expect_err("Parent must exist.");

	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn rejects_wrong_embedding_length() {
	let store = store();
	let mut root = node("root", 0, None);

	root.embedding = vec![0.0; 3];

	let err = store.save(&root).await.expect_err("Dimension must be checked.");

	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn parent_cannot_change_after_creation() {
	let store = store();

	store.save(&node("a", 0, None)).await.expect("Failed to save a.");
	store.save(&node("b", 0, None)).await.expect("Failed to save b.");
	store.save(&node("c", 1, Some("a"))).await.expect("Failed to save c.");

	let err = store.save(&node("c", 1, Some("b"))).await.expect_err("Parent is immutable.");

	assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn upsert_keeps_fields_left_unset() {
	let store = store();
	let mut first = node("root", 0, None);

	first.reply = Some("reply".to_string());
	first.score = Some(0.8);
	first.score_reasoning = Some("good".to_string());

	store.save(&first).await.expect("Failed to save first version.");

	let mut second = node("root", 0, None);

	second.prompt = "edited prompt".to_string();
	second.xy = Point::new(3.0, 4.0);

	store.save(&second).await.expect("Failed to save second version.");

	let loaded = store.get(&first.id).await.expect("Failed to load.").expect("Node must exist.");

	assert_eq!(loaded.prompt, "edited prompt");
	assert_eq!(loaded.reply.as_deref(), Some("reply"));
	assert_eq!(loaded.score, Some(0.8));
	assert_eq!(loaded.score_reasoning.as_deref(), Some("good"));
	assert_eq!(loaded.xy, Point::new(3.0, 4.0));
}

#[tokio::test]
async fn path_runs_from_root_to_node() {
	let store = store();

	store.save(&node("root", 0, None)).await.expect("Failed to save root.");
	store.save(&node("mid", 1, Some("root"))).await.expect("Failed to save mid.");
	store.save(&node("leaf", 2, Some("mid"))).await.expect("Failed to save leaf.");

	let path = store.path(&NodeId::from("leaf")).await.expect("Failed to load path.");
	let ids: Vec<&str> = path.iter().map(|n| n.id.as_str()).collect();

	assert_eq!(ids, ["root", "mid", "leaf"]);
	assert!(store.path(&NodeId::from("ghost")).await.expect("Failed to load path.").is_empty());
}

#[tokio::test]
async fn top_scored_skips_unscored_nodes() {
	let store = store();

	for (id, score) in [("a", Some(0.2)), ("b", None), ("c", Some(0.9)), ("d", Some(0.5))] {
		let mut n = node(id, 0, None);

		n.score = score;

		store.save(&n).await.expect("Failed to save node.");
	}

	let top = store.top_scored(2).await.expect("Failed to load top nodes.");
	let ids: Vec<&str> = top.iter().map(|n| n.id.as_str()).collect();

	assert_eq!(ids, ["c", "d"]);
}

#[tokio::test]
async fn pop_returns_highest_priority_first() {
	let store = store();

	store.push(&NodeId::from("low"), 0.1).await.expect("Failed to push.");
	store.push(&NodeId::from("high"), 0.9).await.expect("Failed to push.");
	store.push(&NodeId::from("mid"), 0.5).await.expect("Failed to push.");

	let first = store.pop_max().await.expect("Failed to pop.").expect("Frontier is not empty.");

	assert_eq!(first.id.as_str(), "high");

	let rest = store.pop_batch(10).await.expect("Failed to pop batch.");
	let ids: Vec<&str> = rest.iter().map(|e| e.id.as_str()).collect();

	assert_eq!(ids, ["mid", "low"]);
	assert_eq!(store.frontier_size().await.expect("Failed to size frontier."), 0);
	assert!(store.pop_max().await.expect("Failed to pop.").is_none());
}

#[tokio::test]
async fn push_replaces_existing_priority() {
	let store = store();
	let id = NodeId::from("n");

	store.push(&id, 0.1).await.expect("Failed to push.");
	store.push(&id, 0.7).await.expect("Failed to push.");

	assert_eq!(store.frontier_size().await.expect("Failed to size frontier."), 1);
	assert_eq!(store.priority(&id).await.expect("Failed to read priority."), Some(0.7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pops_never_share_an_id() {
	let store = store();
	let total = 200;

	for i in 0..total {
		store.push(&NodeId::new(format!("n{i:03}")), f64::from(i)).await.expect("Failed to push.");
	}

	let tasks = (0..8).map(|_| {
		let store = store.clone();

		tokio::spawn(async move {
			let mut popped = Vec::new();

			loop {
				let batch = store.pop_batch(7).await.expect("Failed to pop batch.");

				if batch.is_empty() {
					break;
				}

				popped.extend(batch.into_iter().map(|e| e.id));
			}

			popped
		})
	});
	let results = futures::future::join_all(tasks).await;
	let mut seen = HashSet::new();
	let mut count = 0;

	for result in results {
		for id in result.expect("Pop task panicked.") {
			count += 1;

			seen.insert(id);
		}
	}

	assert_eq!(count, total as usize);
	assert_eq!(seen.len(), total as usize);
}

#[tokio::test]
async fn boost_compounds_and_raises_negative_priorities() {
	let store = store();
	let positive = NodeId::from("positive");
	let negative = NodeId::from("negative");

	store.push(&positive, 0.5).await.expect("Failed to push.");
	store.push(&negative, -0.4).await.expect("Failed to push.");

	let ids = [positive.clone(), negative.clone(), NodeId::from("absent")];
	let boosted = store.boost(&ids, 2.0).await.expect("Failed to boost.");

	assert_eq!(boosted, 2);

	store.boost(&ids, 2.0).await.expect("Failed to boost.");

	assert_eq!(store.priority(&positive).await.expect("Failed to read."), Some(2.0));
	assert_eq!(store.priority(&negative).await.expect("Failed to read."), Some(-0.1));
	assert!(store.boost(&ids, 0.0).await.is_err());
}

#[tokio::test]
async fn reprioritized_entries_pop_in_their_new_order() {
	let store = store();

	for (id, priority) in [("a", 0.9), ("b", 0.6), ("c", 0.3), ("d", 0.1)] {
		store.push(&NodeId::from(id), priority).await.expect("Failed to push.");
	}

	store.boost(&[NodeId::from("c")], 4.0).await.expect("Failed to boost.");
	store.push(&NodeId::from("a"), 0.2).await.expect("Failed to push.");
	store.push(&NodeId::from("d"), 0.2).await.expect("Failed to push.");

	assert_eq!(store.frontier_size().await.expect("Failed to count."), 4);
	assert_eq!(store.max_priority().await.expect("Failed to read."), Some(1.2));

	let listed: Vec<String> = store
		.frontier_entries()
		.await
		.expect("Failed to list.")
		.into_iter()
		.map(|entry| entry.id.to_string())
		.collect();

	assert_eq!(listed, ["c", "b", "a", "d"]);

	let popped = store.pop_batch(3).await.expect("Failed to pop.");
	let order: Vec<(String, f64)> =
		popped.into_iter().map(|entry| (entry.id.to_string(), entry.priority)).collect();

	assert_eq!(order, [("c".to_string(), 1.2), ("b".to_string(), 0.6), ("a".to_string(), 0.2)]);
	assert_eq!(store.frontier_size().await.expect("Failed to count."), 1);
	assert_eq!(store.priority(&NodeId::from("d")).await.expect("Failed to read."), Some(0.2));
}

#[tokio::test]
async fn usage_accumulates() {
	let store = store();

	store
		.add_usage(Usage { prompt_tokens: 10, completion_tokens: 5, cost: 0.25 })
		.await
		.expect("Failed to add usage.");

	let totals = store
		.add_usage(Usage { prompt_tokens: 3, completion_tokens: 2, cost: 0.5 })
		.await
		.expect("Failed to add usage.");

	assert_eq!(totals, Usage { prompt_tokens: 13, completion_tokens: 7, cost: 0.75 });
	assert_eq!(store.usage().await.expect("Failed to read usage."), totals);
}

#[tokio::test]
async fn settings_patch_bumps_version() {
	let store = store();
	let initial = store.load_settings(defaults()).await.expect("Failed to load settings.");

	assert_eq!(initial, defaults());

	let patched = store
		.patch_settings(SettingsPatch { lambda_sim: Some(0.9), ..Default::default() }, defaults())
		.await
		.expect("Failed to patch settings.");

	assert_eq!(patched.lambda_sim, 0.9);
	assert_eq!(patched.lambda_trend, 0.3);
	assert_eq!(patched.version, 2);
	assert_eq!(store.load_settings(defaults()).await.expect("Failed to load settings."), patched);
}

#[tokio::test]
async fn projection_model_round_trips() {
	let store = store();

	assert!(store.load_projection().await.expect("Failed to load projection.").is_none());

	let corpus = vec![
		vec![1.0, 0.0, 0.0, 0.0],
		vec![0.0, 1.0, 0.0, 0.0],
		vec![0.0, 0.0, 1.0, 0.5],
		vec![0.5, 0.5, 0.0, 1.0],
	];
	let model = ProjectionModel::fit(&corpus, 32).expect("Failed to fit projection.");

	store.save_projection(&model).await.expect("Failed to save projection.");

	let loaded = store
		.load_projection()
		.await
		.expect("Failed to load projection.")
		.expect("Projection must be stored.");

	assert_eq!(loaded.corpus_size, model.corpus_size);

	for vector in &corpus {
		let (a, b) = (loaded.project(vector), model.project(vector));

		assert!(a.distance(b) < 1e-9);
	}
}

#[tokio::test]
async fn subscribers_receive_published_updates() {
	let store = store();
	let mut first = store.subscribe();
	let mut second = store.subscribe();
	let update = GraphUpdate {
		id: NodeId::from("n"),
		xy: Point::new(0.5, 0.5),
		score: Some(0.4),
		parent: None,
	};

	store.publish(&update).await;

	assert_eq!(first.recv().await.expect("First observer must receive."), update);
	assert_eq!(second.recv().await.expect("Second observer must receive."), update);
	assert!(store.spawn_relay().is_none());
}
