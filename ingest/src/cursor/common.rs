use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Result;

use crate::{error::IngestError, types::Checkpoint};

/// Client used to interact with the checkpoint persistence backend.
///
/// Implementations must make `put_checkpoint` atomic per key: a concurrent or subsequent read
/// observes either the previous or the new value, never a partial one.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Reads the stored checkpoint of a source, if any.
    async fn get_checkpoint(&self, source_key: &str) -> Result<Option<u64>, IngestError>;

    /// Replaces the stored checkpoint of a source.
    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IngestError>;

    /// Deletes the stored checkpoint of a source.
    async fn delete_checkpoint(&self, source_key: &str) -> Result<(), IngestError>;
}

#[async_trait]
impl<P> PersistenceClient for Arc<P>
where
    P: PersistenceClient + ?Sized,
{
    async fn get_checkpoint(&self, source_key: &str) -> Result<Option<u64>, IngestError> {
        (**self).get_checkpoint(source_key).await
    }

    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        (**self).put_checkpoint(checkpoint).await
    }

    async fn delete_checkpoint(&self, source_key: &str) -> Result<(), IngestError> {
        (**self).delete_checkpoint(source_key).await
    }
}
