use crate::config::StorageConfig;
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, Url};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Step of the create/append/flush protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Create,
    Append,
    Flush,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStage::Create => f.write_str("create"),
            UploadStage::Append => f.write_str("append"),
            UploadStage::Flush => f.write_str("flush"),
        }
    }
}

/// Errors raised while writing a blob
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid blob filename {0:?}")]
    InvalidFilename(String),

    #[error("Invalid storage endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Failed to build storage client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{stage} request for {filename} failed: {source}")]
    Transport {
        filename: String,
        stage: UploadStage,
        #[source]
        source: reqwest::Error,
    },

    #[error("{stage} of {filename} rejected with status {status}: {message}")]
    Rejected {
        filename: String,
        stage: UploadStage,
        status: u16,
        message: String,
    },
}

/// Hierarchical blob store operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create an empty file at `filename`
    async fn create_file(&self, filename: &str) -> Result<(), UploadError>;

    /// Stage `data` at `offset`
    async fn append_data(&self, filename: &str, data: &[u8], offset: u64)
        -> Result<(), UploadError>;

    /// Commit staged data up to `position`
    async fn flush_data(&self, filename: &str, position: u64) -> Result<(), UploadError>;
}

/// Azure Data Lake Storage Gen2 client over the DFS REST API
pub struct DataLakeClient {
    client: Client,
    file_system_url: Url,
    sas_token: String,
    api_version: String,
}

impl DataLakeClient {
    /// Create a client for the configured account and container
    pub fn new(config: &StorageConfig) -> Result<Self, UploadError> {
        let endpoint = config.endpoint();
        let mut file_system_url =
            Url::parse(&endpoint).map_err(|e| UploadError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        file_system_url
            .path_segments_mut()
            .map_err(|_| UploadError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                message: "Endpoint cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .push(&config.container_name);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(UploadError::Client)?;

        info!(
            storage_account = %config.storage_account,
            container = %config.container_name,
            "Data Lake client initialized"
        );

        Ok(Self {
            client,
            file_system_url,
            sas_token: config.sas_token.trim_start_matches('?').to_string(),
            api_version: config.api_version.clone(),
        })
    }

    /// URL of `filename` with the operation query and SAS token appended
    fn file_url(&self, filename: &str, operation: &str) -> Result<Url, UploadError> {
        if filename.is_empty()
            || filename
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(UploadError::InvalidFilename(filename.to_string()));
        }

        let mut url = self.file_system_url.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::InvalidFilename(filename.to_string()))?
            .extend(filename.split('/'));

        if self.sas_token.is_empty() {
            url.set_query(Some(operation));
        } else {
            url.set_query(Some(&format!("{operation}&{}", self.sas_token)));
        }

        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        filename: &str,
        stage: UploadStage,
        operation: &str,
        body: Vec<u8>,
    ) -> Result<(), UploadError> {
        let url = self.file_url(filename, operation)?;

        let response = self
            .client
            .request(method, url)
            .header("x-ms-version", &self.api_version)
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(|source| UploadError::Transport {
                filename: filename.to_string(),
                stage,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                filename: filename.to_string(),
                stage,
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl BlobStore for DataLakeClient {
    async fn create_file(&self, filename: &str) -> Result<(), UploadError> {
        self.send(
            Method::PUT,
            filename,
            UploadStage::Create,
            "resource=file",
            Vec::new(),
        )
        .await
    }

    async fn append_data(
        &self,
        filename: &str,
        data: &[u8],
        offset: u64,
    ) -> Result<(), UploadError> {
        self.send(
            Method::PATCH,
            filename,
            UploadStage::Append,
            &format!("action=append&position={offset}"),
            data.to_vec(),
        )
        .await
    }

    async fn flush_data(&self, filename: &str, position: u64) -> Result<(), UploadError> {
        self.send(
            Method::PATCH,
            filename,
            UploadStage::Flush,
            &format!("action=flush&position={position}"),
            Vec::new(),
        )
        .await
    }
}

/// Writes whole documents as single-append blobs
pub struct SinkUploader {
    store: Arc<dyn BlobStore>,
}

impl SinkUploader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Create `filename`, append `content` at offset 0, then flush at its length.
    ///
    /// A failure after create leaves a partial blob behind.
    #[instrument(skip(self, content), fields(size_bytes = content.len()))]
    pub async fn upload(&self, filename: &str, content: &[u8]) -> Result<(), UploadError> {
        let length = content.len() as u64;

        self.store.create_file(filename).await?;
        self.store.append_data(filename, content, 0).await?;
        self.store.flush_data(filename, length).await?;

        debug!(filename = %filename, "Blob written");
        Ok(())
    }
}
