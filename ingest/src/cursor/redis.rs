use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use redis::{aio::MultiplexedConnection, AsyncCommands};

use crate::{
    error::{IngestError, IngestErrorResultExt},
    types::Checkpoint,
};

use super::common::PersistenceClient;

/// Stores each checkpoint under `<prefix>:<source key>`.
pub struct RedisPersistence {
    connection: MultiplexedConnection,
    prefix: String,
}

impl RedisPersistence {
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
    ) -> Result<RedisPersistence, IngestError> {
        let client = redis::Client::open(url)
            .persistence(&format!("failed to connect to redis server at {url}"))?;

        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .persistence("failed to connect to redis")?;

        Ok(RedisPersistence {
            connection,
            prefix: prefix.into(),
        })
    }

    fn key(&self, source_key: &str) -> String {
        format!("{}:{}", self.prefix, source_key)
    }
}

#[async_trait]
impl PersistenceClient for RedisPersistence {
    async fn get_checkpoint(&self, source_key: &str) -> Result<Option<u64>, IngestError> {
        let key = self.key(source_key);
        let mut conn = self.connection.clone();

        let content = conn
            .get::<_, Option<String>>(&key)
            .await
            .persistence("failed to get checkpoint from redis")
            .attach_printable_lazy(|| format!("key: {key}"))?;

        match content {
            None => Ok(None),
            Some(content) => {
                let checkpoint: Checkpoint = serde_json::from_str(&content)
                    .persistence("failed to deserialize checkpoint")
                    .attach_printable_lazy(|| format!("key: {key}"))?;
                Ok(Some(checkpoint.value))
            }
        }
    }

    /// Redis `SET` replaces the value atomically.
    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        let key = self.key(&checkpoint.source_key);
        let mut conn = self.connection.clone();

        let serialized =
            serde_json::to_string(checkpoint).persistence("failed to serialize checkpoint")?;

        conn.set::<_, _, ()>(&key, serialized)
            .await
            .persistence("failed to put checkpoint in redis")
            .attach_printable_lazy(|| format!("key: {key}"))?;

        Ok(())
    }

    async fn delete_checkpoint(&self, source_key: &str) -> Result<(), IngestError> {
        let key = self.key(source_key);
        let mut conn = self.connection.clone();

        conn.del::<_, ()>(&key)
            .await
            .persistence("failed to delete checkpoint from redis")
            .attach_printable_lazy(|| format!("key: {key}"))?;

        Ok(())
    }
}
