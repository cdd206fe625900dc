//! Persist checkpoints to a directory, one file per source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use tokio::{fs, io::AsyncWriteExt};
use tracing::info;

use crate::{
    error::{IngestError, IngestErrorResultExt},
    types::Checkpoint,
};

use super::common::PersistenceClient;

pub struct DirPersistence {
    path: PathBuf,
}

impl DirPersistence {
    pub fn initialize(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();

        std::fs::create_dir_all(path)
            .persistence("failed to create checkpoint directory")
            .attach_printable_lazy(|| format!("path: {:?}", path))?;

        info!(path = ?path, "persisting checkpoints to directory");

        Ok(Self { path: path.into() })
    }

    pub fn checkpoint_file_path(&self, source_key: &str) -> Result<PathBuf, IngestError> {
        check_source_key(source_key)?;
        Ok(self.path.join(format!("{source_key}.checkpoint")))
    }

    fn temporary_file_path(&self, source_key: &str) -> PathBuf {
        self.path.join(format!(
            ".{source_key}.checkpoint.{}.tmp",
            std::process::id()
        ))
    }
}

#[async_trait]
impl PersistenceClient for DirPersistence {
    async fn get_checkpoint(&self, source_key: &str) -> Result<Option<u64>, IngestError> {
        let path = self.checkpoint_file_path(source_key)?;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .persistence("failed to read checkpoint file")
                    .attach_printable_lazy(|| format!("path: {:?}", path));
            }
        };

        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .persistence("failed to deserialize checkpoint")
            .attach_printable_lazy(|| format!("path: {:?}", path))?;

        Ok(Some(checkpoint.value))
    }

    /// Writes the new checkpoint to a temporary file and renames it over the previous one, so
    /// that a crash mid-write leaves the previous checkpoint intact.
    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        let path = self.checkpoint_file_path(&checkpoint.source_key)?;
        let temporary = self.temporary_file_path(&checkpoint.source_key);

        let serialized =
            serde_json::to_vec(checkpoint).persistence("failed to serialize checkpoint")?;

        let mut file = fs::File::create(&temporary)
            .await
            .persistence("failed to create temporary checkpoint file")
            .attach_printable_lazy(|| format!("path: {:?}", temporary))?;
        file.write_all(&serialized)
            .await
            .persistence("failed to write temporary checkpoint file")?;
        file.sync_all()
            .await
            .persistence("failed to sync temporary checkpoint file")?;
        drop(file);

        fs::rename(&temporary, &path)
            .await
            .persistence("failed to replace checkpoint file")
            .attach_printable_lazy(|| format!("path: {:?}", path))?;

        // The rename is only durable once the directory entry is.
        sync_directory(&self.path).await?;

        Ok(())
    }

    async fn delete_checkpoint(&self, source_key: &str) -> Result<(), IngestError> {
        let path = self.checkpoint_file_path(source_key)?;
        match fs::remove_file(&path).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .persistence("failed to delete checkpoint file")
                .attach_printable_lazy(|| format!("path: {:?}", path)),
        }
    }
}

#[cfg(unix)]
async fn sync_directory(path: &Path) -> Result<(), IngestError> {
    let directory = fs::File::open(path)
        .await
        .persistence("failed to open checkpoint directory")
        .attach_printable_lazy(|| format!("path: {:?}", path))?;
    directory
        .sync_all()
        .await
        .persistence("failed to sync checkpoint directory")
        .attach_printable_lazy(|| format!("path: {:?}", path))
}

#[cfg(not(unix))]
async fn sync_directory(_path: &Path) -> Result<(), IngestError> {
    Ok(())
}

fn check_source_key(source_key: &str) -> Result<(), IngestError> {
    let valid = !source_key.is_empty()
        && !source_key.starts_with('.')
        && source_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if !valid {
        return Err(IngestError::persistence(&format!(
            "source key cannot be used as file name: {source_key:?}"
        )));
    }

    Ok(())
}
