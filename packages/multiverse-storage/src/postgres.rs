use std::time::Duration;

use serde_json::Value;
use sqlx::{
	FromRow, PgPool,
	postgres::{PgListener, PgPoolOptions},
};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
	Error, FRONTIER, FrontierEntry, GRAPH_CHANNEL, Result, SETTINGS_RECORD, schema,
};
use multiverse_domain::{GraphUpdate, Node, NodeId, Point, SchedulerSettings, SettingsPatch, Usage};

const SCHEMA_LOCK_ID: i64 = 7_120_115;
const RELAY_RETRY: Duration = Duration::from_secs(1);
const NODE_COLUMNS: &str = "\
node_id, prompt, reply, score, score_reasoning, depth, parent_id, embedding, x, y,
prompt_tokens, completion_tokens, agent_cost";

#[derive(Clone)]
pub struct PgStore {
	pub pool: PgPool,
	updates: broadcast::Sender<GraphUpdate>,
	vector_dim: u32,
}
impl PgStore {
	pub async fn connect(
		cfg: &multiverse_config::Postgres,
		vector_dim: u32,
		fanout_capacity: usize,
	) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;
		let (updates, _) = broadcast::channel(fanout_capacity.max(1));

		Ok(Self { pool, updates, vector_dim })
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = schema::render_schema(self.vector_dim);
		// Advisory locks are held per connection, so the lock and the DDL share one transaction.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(SCHEMA_LOCK_ID)
			.execute(&mut *tx)
			.await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	pub async fn save(&self, node: &Node) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let existing: Option<(Option<String>, i32)> =
			sqlx::query_as("SELECT parent_id, depth FROM nodes WHERE node_id = $1 FOR UPDATE")
				.bind(node.id.as_str())
				.fetch_optional(&mut *tx)
				.await?;

		match existing {
			Some((parent, depth)) => {
				let parent = parent.map(NodeId::from);

				crate::check_immutable((&parent, depth as u32), node)?;
			},
			None => {
				let parent_depth = match node.parent.as_ref() {
					Some(parent) => sqlx::query_scalar::<_, i32>(
						"SELECT depth FROM nodes WHERE node_id = $1",
					)
					.bind(parent.as_str())
					.fetch_optional(&mut *tx)
					.await?
					.map(|depth| depth as u32),
					None => None,
				};

				crate::check_insert(node, self.vector_dim as usize, parent_depth)?;
			},
		}

		sqlx::query(
			"\
INSERT INTO nodes (
	node_id, prompt, reply, score, score_reasoning, depth, parent_id, embedding, x, y,
	prompt_tokens, completion_tokens, agent_cost
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (node_id) DO UPDATE
SET
	prompt = EXCLUDED.prompt,
	reply = COALESCE(EXCLUDED.reply, nodes.reply),
	score = COALESCE(EXCLUDED.score, nodes.score),
	score_reasoning = COALESCE(EXCLUDED.score_reasoning, nodes.score_reasoning),
	x = EXCLUDED.x,
	y = EXCLUDED.y,
	prompt_tokens = COALESCE(EXCLUDED.prompt_tokens, nodes.prompt_tokens),
	completion_tokens = COALESCE(EXCLUDED.completion_tokens, nodes.completion_tokens),
	agent_cost = COALESCE(EXCLUDED.agent_cost, nodes.agent_cost)",
		)
		.bind(node.id.as_str())
		.bind(&node.prompt)
		.bind(node.reply.as_deref())
		.bind(node.score)
		.bind(node.score_reasoning.as_deref())
		.bind(node.depth as i32)
		.bind(node.parent.as_ref().map(NodeId::as_str))
		.bind(&node.embedding)
		.bind(node.xy.x)
		.bind(node.xy.y)
		.bind(node.prompt_tokens.map(|v| v as i64))
		.bind(node.completion_tokens.map(|v| v as i64))
		.bind(node.agent_cost)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(())
	}

	pub async fn get(&self, id: &NodeId) -> Result<Option<Node>> {
		let row: Option<NodeRow> =
			sqlx::query_as(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = $1"))
				.bind(id.as_str())
				.fetch_optional(&self.pool)
				.await?;

		Ok(row.map(Node::from))
	}

	pub async fn all(&self) -> Result<Vec<Node>> {
		let rows: Vec<NodeRow> =
			sqlx::query_as(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY created_seq"))
				.fetch_all(&self.pool)
				.await?;

		Ok(rows.into_iter().map(Node::from).collect())
	}

	pub async fn count(&self) -> Result<u64> {
		let count: i64 =
			sqlx::query_scalar("SELECT count(*) FROM nodes").fetch_one(&self.pool).await?;

		Ok(count as u64)
	}

	pub async fn top_scored(&self, k: usize) -> Result<Vec<Node>> {
		let rows: Vec<NodeRow> = sqlx::query_as(&format!(
			"\
SELECT {NODE_COLUMNS}
FROM nodes
WHERE score IS NOT NULL
ORDER BY score DESC, node_id
LIMIT $1"
		))
		.bind(k as i64)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(Node::from).collect())
	}

	pub async fn path(&self, id: &NodeId) -> Result<Vec<Node>> {
		let rows: Vec<NodeRow> = sqlx::query_as(&format!(
			"\
WITH RECURSIVE path AS (
	SELECT {NODE_COLUMNS}, 0 AS hops FROM nodes WHERE node_id = $1
	UNION ALL
	SELECT {NODE_COLUMNS_N}, path.hops + 1
	FROM nodes n
	JOIN path ON n.node_id = path.parent_id
)
SELECT {NODE_COLUMNS} FROM path ORDER BY hops DESC",
			NODE_COLUMNS_N = qualified_columns("n"),
		))
		.bind(id.as_str())
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(Node::from).collect())
	}

	pub async fn update_xy(&self, points: &[(NodeId, Point)]) -> Result<u64> {
		let ids: Vec<&str> = points.iter().map(|(id, _)| id.as_str()).collect();
		let xs: Vec<f64> = points.iter().map(|(_, p)| p.x).collect();
		let ys: Vec<f64> = points.iter().map(|(_, p)| p.y).collect();
		let result = sqlx::query(
			"\
UPDATE nodes
SET x = data.x, y = data.y
FROM UNNEST($1::text[], $2::float8[], $3::float8[]) AS data(node_id, x, y)
WHERE nodes.node_id = data.node_id",
		)
		.bind(&ids)
		.bind(&xs)
		.bind(&ys)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	pub async fn push(&self, id: &NodeId, priority: f64) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO frontier (frontier_name, node_id, priority)
VALUES ($1, $2, $3)
ON CONFLICT (frontier_name, node_id) DO UPDATE SET priority = EXCLUDED.priority",
		)
		.bind(FRONTIER)
		.bind(id.as_str())
		.bind(priority)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	pub async fn pop_batch(&self, n: usize) -> Result<Vec<FrontierEntry>> {
		let rows: Vec<(String, f64)> = sqlx::query_as(
			"\
DELETE FROM frontier f
USING (
	SELECT node_id
	FROM frontier
	WHERE frontier_name = $1
	ORDER BY priority DESC, node_id
	LIMIT $2
	FOR UPDATE SKIP LOCKED
) picked
WHERE f.frontier_name = $1 AND f.node_id = picked.node_id
RETURNING f.node_id, f.priority",
		)
		.bind(FRONTIER)
		.bind(n as i64)
		.fetch_all(&self.pool)
		.await?;
		let mut entries: Vec<FrontierEntry> = rows
			.into_iter()
			.map(|(id, priority)| FrontierEntry { id: NodeId::from(id), priority })
			.collect();

		entries.sort_by(|a, b| b.priority.total_cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

		Ok(entries)
	}

	pub async fn frontier_size(&self) -> Result<u64> {
		let count: i64 =
			sqlx::query_scalar("SELECT count(*) FROM frontier WHERE frontier_name = $1")
				.bind(FRONTIER)
				.fetch_one(&self.pool)
				.await?;

		Ok(count as u64)
	}

	pub async fn priority(&self, id: &NodeId) -> Result<Option<f64>> {
		Ok(sqlx::query_scalar(
			"SELECT priority FROM frontier WHERE frontier_name = $1 AND node_id = $2",
		)
		.bind(FRONTIER)
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await?)
	}

	pub async fn max_priority(&self) -> Result<Option<f64>> {
		Ok(sqlx::query_scalar("SELECT max(priority) FROM frontier WHERE frontier_name = $1")
			.bind(FRONTIER)
			.fetch_one(&self.pool)
			.await?)
	}

	pub async fn frontier_entries(&self) -> Result<Vec<FrontierEntry>> {
		let rows: Vec<(String, f64)> = sqlx::query_as(
			"\
SELECT node_id, priority
FROM frontier
WHERE frontier_name = $1
ORDER BY priority DESC, node_id",
		)
		.bind(FRONTIER)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|(id, priority)| FrontierEntry { id: NodeId::from(id), priority })
			.collect())
	}

	pub async fn boost(&self, ids: &[NodeId], factor: f64) -> Result<u64> {
		let ids: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
		let result = sqlx::query(
			"\
UPDATE frontier
SET priority = CASE WHEN priority >= 0 THEN priority * $3 ELSE priority / $3 END
WHERE frontier_name = $1 AND node_id = ANY($2)",
		)
		.bind(FRONTIER)
		.bind(&ids)
		.bind(factor)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	pub async fn add_usage(&self, usage: Usage) -> Result<Usage> {
		let rows: Vec<(String, f64)> = sqlx::query_as(
			"\
INSERT INTO usage_counters (counter_name, value)
VALUES ('prompt_tokens', $1), ('completion_tokens', $2), ('total_cost', $3)
ON CONFLICT (counter_name) DO UPDATE SET value = usage_counters.value + EXCLUDED.value
RETURNING counter_name, value",
		)
		.bind(usage.prompt_tokens as f64)
		.bind(usage.completion_tokens as f64)
		.bind(usage.cost)
		.fetch_all(&self.pool)
		.await?;

		Ok(usage_from_counters(rows))
	}

	pub async fn usage(&self) -> Result<Usage> {
		let rows: Vec<(String, f64)> =
			sqlx::query_as("SELECT counter_name, value FROM usage_counters")
				.fetch_all(&self.pool)
				.await?;

		Ok(usage_from_counters(rows))
	}

	pub async fn load_settings(&self, defaults: SchedulerSettings) -> Result<SchedulerSettings> {
		self.seed_settings(&defaults).await?;

		let row: SettingsRow = sqlx::query_as(
			"\
SELECT lambda_trend, lambda_sim, lambda_depth, budget_usd, version
FROM scheduler_settings
WHERE settings_name = $1",
		)
		.bind(SETTINGS_RECORD)
		.fetch_one(&self.pool)
		.await?;

		Ok(row.into())
	}

	pub async fn patch_settings(
		&self,
		patch: SettingsPatch,
		defaults: SchedulerSettings,
	) -> Result<SchedulerSettings> {
		self.seed_settings(&defaults).await?;

		let row: SettingsRow = sqlx::query_as(
			"\
UPDATE scheduler_settings
SET
	lambda_trend = COALESCE($2, lambda_trend),
	lambda_sim = COALESCE($3, lambda_sim),
	lambda_depth = COALESCE($4, lambda_depth),
	budget_usd = COALESCE($5, budget_usd),
	version = version + 1
WHERE settings_name = $1
RETURNING lambda_trend, lambda_sim, lambda_depth, budget_usd, version",
		)
		.bind(SETTINGS_RECORD)
		.bind(patch.lambda_trend)
		.bind(patch.lambda_sim)
		.bind(patch.lambda_depth)
		.bind(patch.budget_usd)
		.fetch_one(&self.pool)
		.await?;

		Ok(row.into())
	}

	pub async fn get_blob(&self, name: &str) -> Result<Option<Value>> {
		Ok(sqlx::query_scalar("SELECT payload FROM blobs WHERE blob_name = $1")
			.bind(name)
			.fetch_optional(&self.pool)
			.await?)
	}

	pub async fn put_blob(&self, name: &str, payload: &Value) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO blobs (blob_name, payload, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (blob_name) DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()",
		)
		.bind(name)
		.bind(payload)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	pub async fn publish(&self, update: &GraphUpdate) {
		let payload = match serde_json::to_string(update) {
			Ok(payload) => payload,
			Err(err) => {
				tracing::warn!(
					error = %err,
					node_id = %update.id,
					"Failed to encode graph update."
				);

				return;
			},
		};
		let result = sqlx::query("SELECT pg_notify($1, $2)")
			.bind(GRAPH_CHANNEL)
			.bind(payload)
			.execute(&self.pool)
			.await;

		if let Err(err) = result {
			tracing::warn!(error = %err, node_id = %update.id, "Graph update notify failed.");
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<GraphUpdate> {
		self.updates.subscribe()
	}

	/// LISTENs on the graph channel and forwards into the local broadcast channel,
	/// reconnecting after failures until the task is aborted.
	pub fn spawn_relay(&self) -> JoinHandle<()> {
		let pool = self.pool.clone();
		let updates = self.updates.clone();

		tokio::spawn(async move {
			loop {
				if let Err(err) = relay(&pool, &updates).await {
					tracing::warn!(error = %err, "Graph update relay failed. Reconnecting.");
				}

				tokio::time::sleep(RELAY_RETRY).await;
			}
		})
	}

	async fn seed_settings(&self, defaults: &SchedulerSettings) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO scheduler_settings (
	settings_name, lambda_trend, lambda_sim, lambda_depth, budget_usd, version
)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (settings_name) DO NOTHING",
		)
		.bind(SETTINGS_RECORD)
		.bind(defaults.lambda_trend)
		.bind(defaults.lambda_sim)
		.bind(defaults.lambda_depth)
		.bind(defaults.budget_usd)
		.bind(defaults.version)
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

async fn relay(pool: &PgPool, updates: &broadcast::Sender<GraphUpdate>) -> Result<()> {
	let mut listener = PgListener::connect_with(pool).await?;

	listener.listen(GRAPH_CHANNEL).await?;

	tracing::info!(channel = GRAPH_CHANNEL, "Graph update relay listening.");

	loop {
		let notification = listener.recv().await?;

		match serde_json::from_str::<GraphUpdate>(notification.payload()) {
			Ok(update) => {
				// No receivers is the common case between observers.
				let _ = updates.send(update);
			},
			Err(err) => {
				tracing::warn!(error = %err, "Dropping malformed graph update.");
			},
		}
	}
}

fn qualified_columns(alias: &str) -> String {
	NODE_COLUMNS
		.split(',')
		.map(|column| format!("{alias}.{}", column.trim()))
		.collect::<Vec<_>>()
		.join(", ")
}

fn usage_from_counters(rows: Vec<(String, f64)>) -> Usage {
	let mut usage = Usage::default();

	for (name, value) in rows {
		match name.as_str() {
			"prompt_tokens" => usage.prompt_tokens = value as u64,
			"completion_tokens" => usage.completion_tokens = value as u64,
			"total_cost" => usage.cost = value,
			_ => {},
		}
	}

	usage
}

#[derive(FromRow)]
struct NodeRow {
	node_id: String,
	prompt: String,
	reply: Option<String>,
	score: Option<f64>,
	score_reasoning: Option<String>,
	depth: i32,
	parent_id: Option<String>,
	embedding: Vec<f32>,
	x: f64,
	y: f64,
	prompt_tokens: Option<i64>,
	completion_tokens: Option<i64>,
	agent_cost: Option<f64>,
}

impl From<NodeRow> for Node {
	fn from(row: NodeRow) -> Self {
		Node {
			id: NodeId::from(row.node_id),
			prompt: row.prompt,
			reply: row.reply,
			score: row.score,
			score_reasoning: row.score_reasoning,
			depth: row.depth as u32,
			parent: row.parent_id.map(NodeId::from),
			embedding: row.embedding,
			xy: Point::new(row.x, row.y),
			prompt_tokens: row.prompt_tokens.map(|v| v as u64),
			completion_tokens: row.completion_tokens.map(|v| v as u64),
			agent_cost: row.agent_cost,
		}
	}
}

#[derive(FromRow)]
struct SettingsRow {
	lambda_trend: f64,
	lambda_sim: f64,
	lambda_depth: f64,
	budget_usd: f64,
	version: i64,
}

impl From<SettingsRow> for SchedulerSettings {
	fn from(row: SettingsRow) -> Self {
		SchedulerSettings {
			lambda_trend: row.lambda_trend,
			lambda_sim: row.lambda_sim,
			lambda_depth: row.lambda_depth,
			budget_usd: row.budget_usd,
			version: row.version,
		}
	}
}
