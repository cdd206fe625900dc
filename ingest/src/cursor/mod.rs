//! Durable per-source checkpoints.
mod common;
mod default;
mod fs;
mod redis;

use std::collections::HashMap;

use clap::Args;
use error_stack::Result;
use serde::Deserialize;
use tracing::{debug, instrument};

pub use self::common::PersistenceClient as PersistenceClientTrait;
pub use self::default::InMemoryPersistence;
pub use self::fs::DirPersistence;
pub use self::redis::RedisPersistence;

use crate::{error::IngestError, types::Checkpoint};

/// Options for the checkpoint persistence.
#[derive(Args, Debug, Clone, Default, Deserialize)]
pub struct CursorStoreOptions {
    #[command(flatten)]
    pub persistence_type: PersistenceTypeOptions,
    /// Prefix added to the redis keys.
    #[arg(long, env, default_value = "yieldline")]
    pub persistence_prefix: String,
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[group(required = false, multiple = false)]
pub struct PersistenceTypeOptions {
    /// Path to the directory used to persist checkpoints.
    #[arg(long, env)]
    pub persist_to_fs: Option<String>,
    /// URL to the redis server used to persist checkpoints.
    #[arg(long, env)]
    pub persist_to_redis: Option<String>,
}

/// Persistence client factory.
pub struct Persistence {
    options: CursorStoreOptions,
}

impl Persistence {
    pub fn new_from_options(options: CursorStoreOptions) -> Self {
        Self { options }
    }

    pub async fn connect(&self) -> Result<PersistenceClient, IngestError> {
        if let Some(dir_path) = &self.options.persistence_type.persist_to_fs {
            let persistence = DirPersistence::initialize(dir_path)?;
            Ok(PersistenceClient::Dir(persistence))
        } else if let Some(redis_url) = &self.options.persistence_type.persist_to_redis {
            let persistence =
                RedisPersistence::connect(redis_url, self.options.persistence_prefix.clone())
                    .await?;
            Ok(PersistenceClient::Redis(persistence))
        } else {
            Ok(PersistenceClient::new_in_memory())
        }
    }
}

pub enum PersistenceClient {
    Dir(DirPersistence),
    Redis(RedisPersistence),
    InMemory(InMemoryPersistence),
}

impl PersistenceClient {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryPersistence::default())
    }

    pub async fn get_checkpoint(&self, source_key: &str) -> Result<Option<u64>, IngestError> {
        match self {
            Self::Dir(inner) => inner.get_checkpoint(source_key).await,
            Self::Redis(inner) => inner.get_checkpoint(source_key).await,
            Self::InMemory(inner) => inner.get_checkpoint(source_key).await,
        }
    }

    pub async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        match self {
            Self::Dir(inner) => inner.put_checkpoint(checkpoint).await,
            Self::Redis(inner) => inner.put_checkpoint(checkpoint).await,
            Self::InMemory(inner) => inner.put_checkpoint(checkpoint).await,
        }
    }

    pub async fn delete_checkpoint(&self, source_key: &str) -> Result<(), IngestError> {
        match self {
            Self::Dir(inner) => inner.delete_checkpoint(source_key).await,
            Self::Redis(inner) => inner.delete_checkpoint(source_key).await,
            Self::InMemory(inner) => inner.delete_checkpoint(source_key).await,
        }
    }
}

/// Checkpoints of all sources, falling back to each source's genesis value when nothing
/// has been stored yet.
pub struct CursorStore {
    client: PersistenceClient,
    genesis: HashMap<String, u64>,
}

impl CursorStore {
    pub fn new(client: PersistenceClient) -> Self {
        Self {
            client,
            genesis: HashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(PersistenceClient::new_in_memory())
    }

    /// Registers the value returned for `source_key` before its first checkpoint is stored.
    pub fn with_genesis(mut self, source_key: impl Into<String>, genesis: u64) -> Self {
        self.genesis.insert(source_key.into(), genesis);
        self
    }

    pub fn genesis(&self, source_key: &str) -> Option<u64> {
        self.genesis.get(source_key).copied()
    }

    /// Returns the last confirmed checkpoint of the source, or its genesis value.
    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    pub async fn get(&self, source_key: &str) -> Result<u64, IngestError> {
        if let Some(value) = self.client.get_checkpoint(source_key).await? {
            return Ok(value);
        }

        match self.genesis(source_key) {
            Some(genesis) => {
                debug!(source_key, genesis, "no checkpoint stored, using genesis");
                Ok(genesis)
            }
            None => Err(IngestError::configuration(&format!(
                "no checkpoint and no genesis for source {source_key}"
            ))),
        }
    }

    /// Returns the stored checkpoint only, ignoring the genesis value.
    pub async fn stored(&self, source_key: &str) -> Result<Option<u64>, IngestError> {
        self.client.get_checkpoint(source_key).await
    }

    /// Atomically replaces the checkpoint of the source.
    #[instrument(skip(self), err(Debug), level = "DEBUG")]
    pub async fn set(&self, source_key: &str, value: u64) -> Result<(), IngestError> {
        self.client
            .put_checkpoint(&Checkpoint::new(source_key, value))
            .await
    }

    /// Deletes the stored checkpoint. The next run restarts from genesis.
    pub async fn delete(&self, source_key: &str) -> Result<(), IngestError> {
        self.client.delete_checkpoint(source_key).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempdir::TempDir;

    use super::{CursorStore, CursorStoreOptions, Persistence, PersistenceTypeOptions};
    use crate::error::IngestError;

    #[tokio::test]
    async fn test_genesis_fallback() {
        let store = CursorStore::in_memory().with_genesis("lido", 1_000);

        assert_eq!(store.get("lido").await.unwrap(), 1_000);
        assert_eq!(store.stored("lido").await.unwrap(), None);

        store.set("lido", 2_000).await.unwrap();
        assert_eq!(store.get("lido").await.unwrap(), 2_000);
        assert_eq!(store.stored("lido").await.unwrap(), Some(2_000));

        store.delete("lido").await.unwrap();
        assert_eq!(store.get("lido").await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_unknown_source_is_configuration_error() {
        let store = CursorStore::in_memory();
        let err = store.get("unknown").await.unwrap_err();
        assert_matches!(err.current_context(), IngestError::Configuration);
    }

    #[tokio::test]
    async fn test_dir_store_survives_restart() {
        let dir = TempDir::new("cursor-store").unwrap();
        let options = CursorStoreOptions {
            persistence_type: PersistenceTypeOptions {
                persist_to_fs: Some(dir.path().to_string_lossy().to_string()),
                persist_to_redis: None,
            },
            persistence_prefix: "test".to_string(),
        };

        {
            let client = Persistence::new_from_options(options.clone())
                .connect()
                .await
                .unwrap();
            let store = CursorStore::new(client).with_genesis("aave", 10);
            store.set("aave", 86_410).await.unwrap();
        }

        let client = Persistence::new_from_options(options)
            .connect()
            .await
            .unwrap();
        let store = CursorStore::new(client).with_genesis("aave", 10);
        assert_eq!(store.get("aave").await.unwrap(), 86_410);
    }
}
