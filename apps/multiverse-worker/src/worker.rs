//! The expansion loop: budget check, batch pop, concurrent expansion, refit.

use std::{sync::Arc, time::Duration};

use futures::future;
use tokio::{sync::watch, task::JoinHandle, time::Instant};

use multiverse_domain::{
	NextStep, Node, NodeId, PriorityWeights, ProjectionModel, Turn, Usage, conversation,
	priority, projection,
};
use multiverse_service::{Error, ExplorerService, RefitReport, Result, settings};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
	/// Spending reached the ceiling. Nothing was popped.
	Throttled { total_cost: f64, ceiling_usd: f64 },
	Idle,
	Expanded(CycleReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
	pub parents: usize,
	pub created: usize,
	pub failed: usize,
	pub rejected: usize,
	pub refit: Option<RefitReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ExpansionReport {
	created: usize,
	failed: usize,
	rejected: usize,
}
impl ExpansionReport {
	fn record(&mut self, err: &Error, children: usize) {
		match err {
			Error::ContentRejected { .. } => self.rejected += children,
			_ => self.failed += children,
		}
	}
}

/// Per-batch context shared by every expansion in the batch.
struct Batch {
	weights: PriorityWeights,
	top_k: Vec<Vec<f32>>,
	model: Option<ProjectionModel>,
}

#[derive(Clone)]
struct Draft {
	prompt: String,
	/// This child's share of the mutator call that proposed its prompt.
	share: Usage,
}

/// Runs cycles until `shutdown` flips. A running batch always completes before the flag
/// is honoured.
pub async fn run_worker(service: Arc<ExplorerService>, mut shutdown: watch::Receiver<bool>) {
	let worker = &service.cfg.worker;

	tracing::info!(
		batch_size = worker.batch_size,
		children_per_node = worker.children_per_node,
		"Expansion worker started."
	);

	loop {
		if *shutdown.borrow() {
			break;
		}

		let pause_ms = match run_cycle(&service).await {
			Ok(CycleOutcome::Throttled { .. }) => service.cfg.budget.backoff_ms,
			Ok(CycleOutcome::Idle) => worker.idle_backoff_ms,
			Ok(CycleOutcome::Expanded(_)) => worker.cycle_pause_ms,
			Err(err) => {
				tracing::error!(error = %err, "Expansion cycle failed.");

				worker.error_backoff_ms
			},
		};

		if sleep_or_shutdown(&mut shutdown, Duration::from_millis(pause_ms)).await {
			break;
		}
	}

	tracing::info!("Expansion worker stopped.");
}

/// One batch: check the budget, pop, expand every popped node concurrently, then refit the
/// projection when due.
pub async fn run_cycle(service: &ExplorerService) -> Result<CycleOutcome> {
	let settings = service.settings().await?;
	let usage = service.store.usage().await?;

	if settings::is_throttled(usage.cost, settings.budget_usd) {
		tracing::warn!(
			total_cost = usage.cost,
			ceiling_usd = settings.budget_usd,
			"Budget ceiling reached. Expansion paused."
		);

		return Ok(CycleOutcome::Throttled {
			total_cost: usage.cost,
			ceiling_usd: settings.budget_usd,
		});
	}

	let batch = Batch {
		weights: settings.weights(),
		top_k: service.top_k_embeddings().await?,
		model: service.store.load_projection().await?,
	};
	let entries = service.store.pop_batch(service.cfg.worker.batch_size as usize).await?;

	if entries.is_empty() {
		tracing::debug!("Frontier is empty.");

		return Ok(CycleOutcome::Idle);
	}

	let results =
		future::join_all(entries.iter().map(|entry| expand_node(service, &entry.id, &batch)))
			.await;
	let mut report = CycleReport { parents: entries.len(), ..Default::default() };
	let mut first_err = None;

	for result in results {
		match result {
			Ok(expansion) => {
				report.created += expansion.created;
				report.failed += expansion.failed;
				report.rejected += expansion.rejected;
			},
			Err(err) => {
				first_err.get_or_insert(err);
			},
		}
	}

	if let Some(err) = first_err {
		return Err(err);
	}

	report.refit = service.refit_if_needed().await?;

	tracing::info!(
		parents = report.parents,
		created = report.created,
		failed = report.failed,
		rejected = report.rejected,
		refit = report.refit.is_some(),
		"Expansion cycle finished."
	);

	Ok(CycleOutcome::Expanded(report))
}

/// Expands one popped node. Collaborator failures skip the affected children; store
/// failures are returned once every sibling has finished.
async fn expand_node(
	service: &ExplorerService,
	id: &NodeId,
	batch: &Batch,
) -> Result<ExpansionReport> {
	let path = service.store.path(id).await?;
	let Some(parent) = path.last() else {
		tracing::warn!(node_id = %id, "Popped node is not stored. Dropping it.");

		return Ok(ExpansionReport::default());
	};
	let dialogue = conversation::plain(&conversation::dialogue(&path));
	let step = NextStep::of(&dialogue);
	let k = service.cfg.worker.children_per_node as usize;
	let mut report = ExpansionReport::default();
	let drafts = match step {
		NextStep::NeedsResponse =>
			vec![Draft { prompt: parent.prompt.clone(), share: Usage::default() }; k],
		NextStep::NeedsStimulus => match service.mutate(&dialogue, k).await {
			Ok((variants, usage)) => {
				let share = usage.share(variants.len());

				// Variants whose mutator call failed have no child.
				report.failed += k.saturating_sub(variants.len());

				variants.into_iter().map(|prompt| Draft { prompt, share }).collect()
			},
			Err(err) if err.is_collaborator() => {
				report.record(&err, k);
				log_child_failure(&parent.id, &err);

				return Ok(report);
			},
			Err(err) => return Err(err),
		},
	};
	let children = drafts
		.into_iter()
		.map(|draft| expand_child(service, parent, &dialogue, step, draft, batch));
	let results = future::join_all(children).await;
	let mut first_err = None;

	for result in results {
		match result {
			Ok(_) => report.created += 1,
			Err(err) if err.is_collaborator() => {
				report.record(&err, 1);
				log_child_failure(&parent.id, &err);
			},
			Err(err) => {
				first_err.get_or_insert(err);
			},
		}
	}

	tracing::info!(
		parent_id = %parent.id,
		depth = parent.depth,
		step = step.as_str(),
		created = report.created,
		failed = report.failed,
		rejected = report.rejected,
		"Expanded node."
	);

	match first_err {
		Some(err) => Err(err),
		None => Ok(report),
	}
}

async fn expand_child(
	service: &ExplorerService,
	parent: &Node,
	dialogue: &[Turn],
	step: NextStep,
	draft: Draft,
	batch: &Batch,
) -> Result<Node> {
	let mut turns = dialogue.to_vec();

	if step == NextStep::NeedsStimulus {
		turns.push(Turn::user(draft.prompt.clone()));
	}

	let completion = service.respond(&turns).await?;

	turns.push(Turn::assistant(completion.content.clone()));

	let (critique, critic_usage) = service.critique(&turns).await?;
	let embedded_text = match step {
		NextStep::NeedsResponse => &completion.content,
		NextStep::NeedsStimulus => &draft.prompt,
	};
	let embedding = service.embed(embedded_text).await?;
	let usage = draft.share.add(completion.usage).add(critic_usage);
	let mut child = Node::new(
		NodeId::generate(),
		draft.prompt,
		parent.depth + 1,
		Some(parent.id.clone()),
		embedding,
	)
	.with_usage(usage);

	child.reply = Some(completion.content);
	child.score = Some(critique.score);
	child.score_reasoning = Some(critique.reasoning);
	child.xy = projection::project(batch.model.as_ref(), &child.embedding);

	let breakdown = priority::priority(
		batch.weights,
		child.score,
		parent.score,
		child.depth,
		&child.embedding,
		&batch.top_k,
	);

	service.store.save(&child).await?;
	service.store.push(&child.id, breakdown.priority).await?;
	service.store.publish(&child.graph_update()).await;

	tracing::info!(
		node_id = %child.id,
		parent_id = %parent.id,
		score = breakdown.score,
		delta = breakdown.delta,
		similarity = breakdown.similarity,
		depth = breakdown.depth,
		priority = breakdown.priority,
		"Child created."
	);

	Ok(child)
}

fn log_child_failure(parent_id: &NodeId, err: &Error) {
	match err {
		Error::ContentRejected { message } => {
			tracing::warn!(
				parent_id = %parent_id,
				reason = %message,
				"Child rejected by moderation."
			);
		},
		other => {
			tracing::warn!(parent_id = %parent_id, error = %other, "Child expansion failed.");
		},
	}
}

/// Reports frontier size, node count, spend and creation velocity until `shutdown` flips.
pub fn spawn_heartbeat(
	service: Arc<ExplorerService>,
	mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let interval = Duration::from_millis(service.cfg.worker.heartbeat_interval_ms);
		let mut last: Option<(u64, Instant)> = None;

		loop {
			if sleep_or_shutdown(&mut shutdown, interval).await {
				break;
			}

			match pulse(&service, last).await {
				Ok(sample) => last = Some(sample),
				Err(err) => tracing::warn!(error = %err, "Heartbeat failed."),
			}
		}
	})
}

async fn pulse(service: &ExplorerService, last: Option<(u64, Instant)>) -> Result<(u64, Instant)> {
	let now = Instant::now();
	let frontier = service.store.frontier_size().await?;
	let nodes = service.store.count().await?;
	let usage = service.store.usage().await?;
	let settings = service.settings().await?;
	let velocity = match last {
		Some((count, at)) => {
			let elapsed = now.duration_since(at).as_secs_f64();

			if elapsed > 0.0 { nodes.saturating_sub(count) as f64 / elapsed } else { 0.0 }
		},
		None => 0.0,
	};

	tracing::info!(
		frontier,
		nodes,
		total_cost = usage.cost,
		ceiling_usd = settings.budget_usd,
		nodes_per_sec = velocity,
		"Worker heartbeat."
	);

	Ok((nodes, now))
}

/// Sleeps for `duration` unless shutdown is requested first. Returns true on shutdown.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
	if *shutdown.borrow() {
		return true;
	}

	let stopped = tokio::select! {
		_ = tokio::time::sleep(duration) => return false,
		changed = shutdown.wait_for(|stop| *stop) => changed.is_ok(),
	};

	// A dropped sender can no longer signal shutdown; keep pacing the caller.
	if !stopped {
		tokio::time::sleep(duration).await;
	}

	stopped
}
