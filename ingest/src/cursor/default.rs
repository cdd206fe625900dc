use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use error_stack::Result;

use crate::{error::IngestError, types::Checkpoint};

use super::common::PersistenceClient;

/// A [PersistenceClient] that keeps checkpoints in memory only.
#[derive(Default)]
pub struct InMemoryPersistence {
    checkpoints: Mutex<HashMap<String, u64>>,
}

impl InMemoryPersistence {
    fn with_checkpoints<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, u64>) -> T,
    ) -> Result<T, IngestError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| IngestError::persistence("in memory checkpoints lock poisoned"))?;
        Ok(f(&mut checkpoints))
    }
}

#[async_trait]
impl PersistenceClient for InMemoryPersistence {
    async fn get_checkpoint(&self, source_key: &str) -> Result<Option<u64>, IngestError> {
        self.with_checkpoints(|checkpoints| checkpoints.get(source_key).copied())
    }

    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        self.with_checkpoints(|checkpoints| {
            checkpoints.insert(checkpoint.source_key.clone(), checkpoint.value);
        })
    }

    async fn delete_checkpoint(&self, source_key: &str) -> Result<(), IngestError> {
        self.with_checkpoints(|checkpoints| {
            checkpoints.remove(source_key);
        })
    }
}
