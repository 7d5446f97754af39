use crate::record::Record;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised by fetch observers
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Hook run once with the full fetch result, before any transfer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchObserver: Send + Sync {
    async fn on_fetched(&self, records: &[Record]) -> Result<(), PersistError>;
}

/// Writes each fetched payload to `{output_dir}/{index}.jpg`
pub struct ImagePersister {
    output_dir: PathBuf,
}

impl ImagePersister {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn image_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("{index}.jpg"))
    }
}

#[async_trait]
impl FetchObserver for ImagePersister {
    #[instrument(skip(self, records), fields(output_dir = %self.output_dir.display(), count = records.len()))]
    async fn on_fetched(&self, records: &[Record]) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| PersistError::CreateDir {
                path: self.output_dir.clone(),
                source,
            })?;

        for (index, record) in records.iter().enumerate() {
            debug!(index = index, metadata = ?record.metadata, "Persisting record");

            let path = self.image_path(index);
            tokio::fs::write(&path, &record.payload)
                .await
                .map_err(|source| PersistError::Write { path, source })?;
        }

        info!(count = records.len(), "Persisted fetched images");
        Ok(())
    }
}
