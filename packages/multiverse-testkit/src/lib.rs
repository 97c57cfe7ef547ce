//! Throwaway Postgres databases, an in-process test config, and scripted collaborators.

pub mod collaborators;

mod error;

pub use collaborators::{Failure, Scripted, ScriptedResponder};
pub use error::{Error, Result};

use std::{env, future::Future, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::runtime::Builder;
use uuid::Uuid;

use multiverse_config::{Config, Postgres, StorageBackend};
use multiverse_service::ExplorerService;
use multiverse_storage::{MemoryStore, Store};

const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];
pub const TEST_VECTOR_DIM: u32 = 4;

const TEST_CONFIG_TOML: &str = r#"
[service]
admin_bind = "127.0.0.1:0"
http_bind  = "127.0.0.1:0"
log_level  = "warn"

[storage]
backend         = "memory"
fanout_capacity = 64
vector_dim      = 4

[providers.embedding]
api_base    = "http://127.0.0.1:9"
api_key     = "test-key"
dimensions  = 4
model       = "test-embedding"
path        = "/embeddings"
provider_id = "test"
timeout_ms  = 1000

[providers.mutator]
api_base      = "http://127.0.0.1:9"
api_key       = "test-key"
model         = "test-chat"
path          = "/chat/completions"
provider_id   = "test"
system_prompt = "Write the next user message."
temperature   = 0.9
timeout_ms    = 1000

[providers.responder]
api_base      = "http://127.0.0.1:9"
api_key       = "test-key"
model         = "test-chat"
path          = "/chat/completions"
provider_id   = "test"
system_prompt = "Reply in character."
temperature   = 0.7
timeout_ms    = 1000

[providers.critic]
api_base      = "http://127.0.0.1:9"
api_key       = "test-key"
model         = "test-chat"
path          = "/chat/completions"
provider_id   = "test"
system_prompt = "Score the trajectory."
temperature   = 0.0
timeout_ms    = 1000

[providers.moderation]
api_base   = "http://127.0.0.1:9"
api_key    = ""
enabled    = false
model      = "test-moderation"
path       = "/moderations"
timeout_ms = 1000

[worker]
batch_size        = 4
children_per_node = 2
embedded          = true

[projection]
min_corpus  = 3
refit_every = 2
"#;

pub struct TestDatabase {
	name: String,
	dsn: String,
	admin_options: PgConnectOptions,
	cleaned: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base_options: PgConnectOptions = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse MULTIVERSE_PG_DSN: {err}.")))?;
		let (admin_options, mut admin_conn) = connect_admin(&base_options).await?;
		let name = format!("multiverse_test_{}", Uuid::new_v4().simple());
		let create_sql = format!(r#"CREATE DATABASE "{name}""#);

		admin_conn
			.execute(create_sql.as_str())
			.await
			.map_err(|err| Error::Message(format!("Failed to create test database: {err}.")))?;

		let dsn = base_options.clone().database(&name).to_url_lossy().to_string();

		Ok(Self { name, dsn, admin_options, cleaned: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn cleanup(mut self) -> Result<()> {
		self.cleanup_inner().await
	}

	async fn cleanup_inner(&mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		cleanup_database(&self.name, &self.admin_options).await?;

		self.cleaned = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		let name = self.name.clone();
		let admin_options = self.admin_options.clone();
		// Drop may run inside a runtime, so cleanup gets its own thread and runtime.
		let cleanup_thread = thread::spawn(move || {
			let runtime = match Builder::new_current_thread().enable_all().build() {
				Ok(runtime) => runtime,
				Err(err) => {
					eprintln!("Test database cleanup failed: {err}.");

					return;
				},
			};

			if let Err(err) = runtime.block_on(cleanup_database(&name, &admin_options)) {
				eprintln!("Test database cleanup failed: {err}.");
			}
		});
		let _ = cleanup_thread.join();
	}
}

pub fn env_dsn() -> Option<String> {
	env::var(multiverse_config::ENV_PG_DSN).ok()
}

pub async fn with_test_db<F, Fut, T>(base_dsn: &str, f: F) -> Result<T>
where
	F: FnOnce(&TestDatabase) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let db = TestDatabase::new(base_dsn).await?;
	let result = f(&db).await;
	let mut db = db;

	if let Err(err) = db.cleanup_inner().await {
		eprintln!("Test database cleanup warning: {err}.");

		if result.is_ok() {
			return Err(err);
		}
	}

	result
}

/// A valid in-process config: memory backend, embedded worker, 4-dimensional embeddings, and
/// moderation disabled. Provider endpoints point at a closed local port.
pub fn test_config() -> Config {
	let cfg: Config = match toml::from_str(TEST_CONFIG_TOML) {
		Ok(cfg) => cfg,
		Err(err) => panic!("Test config template must parse: {err}."),
	};

	if let Err(err) = multiverse_config::validate(&cfg) {
		panic!("Test config template must validate: {err}.");
	}

	cfg
}

/// [`test_config`] switched to the Postgres backend at `dsn`.
pub fn postgres_config(dsn: &str) -> Config {
	let mut cfg = test_config();

	cfg.storage.backend = StorageBackend::Postgres;
	cfg.storage.postgres = Some(Postgres { dsn: dsn.to_string(), pool_max_conns: 4 });
	cfg.worker.embedded = false;

	cfg
}

/// An in-memory service over `cfg` wired to the scripted collaborators.
pub fn memory_service(cfg: Config, scripted: &Scripted) -> ExplorerService {
	let store =
		Store::Memory(MemoryStore::new(cfg.storage.vector_dim, cfg.storage.fanout_capacity));

	ExplorerService::with_providers(cfg, store, scripted.providers())
}

async fn connect_admin(
	base_options: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut last_err = None;

	for database in ADMIN_DATABASES {
		let options = base_options.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => {
				last_err = Some(err);
			},
		}
	}

	Err(Error::Message(format!("Failed to connect to an admin database: {last_err:?}.")))
}

async fn cleanup_database(name: &str, admin_options: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(admin_options).await.map_err(|err| {
		Error::Message(format!("Failed to connect to admin database for cleanup: {err}."))
	})?;
	let drop_sql = format!(r#"DROP DATABASE IF EXISTS "{name}""#);
	let _ = sqlx::query(
		"\
SELECT pg_terminate_backend(pid)
FROM pg_stat_activity
WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.fetch_all(&mut conn)
	.await;

	sqlx::query(drop_sql.as_str())
		.execute(&mut conn)
		.await
		.map_err(|err| Error::Message(format!("Failed to drop test database: {err}.")))?;

	Ok(())
}
