//! Application state wiring the engine to its SQLite stores.
//!
//! The engine is generic over `RunStore` and `SubjectRepository`; AppState
//! pins it to the concrete infra implementations.

use std::sync::Arc;

use anyhow::Context;
use casegate_core::pipeline::engine::Engine;
use casegate_infra::config::{database_url, load_engine_config, resolve_data_dir};
use casegate_infra::sqlite::pool::DatabasePool;
use casegate_infra::sqlite::run::SqliteRunStore;
use casegate_infra::sqlite::subject::SqliteSubjectRepository;
use casegate_types::config::EngineConfig;

/// The engine pinned to SQLite storage.
pub type ConcreteEngine = Engine<SqliteRunStore, SqliteSubjectRepository>;

/// Shared state for every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub config: EngineConfig,
}

impl AppState {
    /// Resolve the data directory, open the database and build the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the casegate database")?;

        let engine = Engine::new(
            SqliteRunStore::new(db_pool.clone()),
            SqliteSubjectRepository::new(db_pool.clone()),
            config.clone(),
        )?;

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            engine: Arc::new(engine),
            config,
        })
    }
}
