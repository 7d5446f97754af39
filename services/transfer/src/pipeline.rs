//! Pipeline driver: connect, list, fetch, persist, then transfer each record.

use crate::config::Config;
use crate::dataset_client::{ConnectionError, DatasetConnector, DatasetSession};
use crate::datalake_uploader::SinkUploader;
use crate::fetcher::{BulkRecordFetcher, FetchedRecords};
use crate::image_persister::FetchObserver;
use crate::paginator::{CursorPaginator, PaginationError};
use crate::record::{DatasetFilter, Record};
use crate::transform::{blob_filename, transform};
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Failures that abort the whole run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to connect to dataset service: {0}")]
    Connect(#[source] ConnectionError),

    #[error("Failed to list dataset identifiers: {0}")]
    Listing(#[from] PaginationError),

    #[error("Failed to fetch records: {0}")]
    Fetch(#[source] ConnectionError),
}

/// Driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connecting,
    Listing,
    Fetching,
    Persisting,
    Transferring,
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a single record failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Transform,
    Upload,
}

/// One record that did not reach the sink
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    /// Position in the listing for fetch failures, in the fetch result otherwise
    pub index: usize,
    /// Record ID, when the metadata carried one
    pub record_id: Option<String>,
    pub stage: FailureStage,
    pub error: String,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dataset_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: usize,
    pub listed: usize,
    pub fetched: usize,
    pub transformed: usize,
    pub uploaded: usize,
    /// Records never attempted because the run halted early
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
}

impl RunSummary {
    fn new(run_id: Uuid, dataset_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            dataset_id,
            started_at,
            finished_at: started_at,
            pages: 0,
            listed: 0,
            fetched: 0,
            transformed: 0,
            uploaded: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Every listed record was uploaded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }
}

/// Tunables for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub dataset_id: String,
    pub page_size: u64,
    pub max_pages: usize,
    pub fetch_batch_size: usize,
    pub halt_on_error: bool,
    /// Retry budget for transient connect failures; zero disables retries
    pub connect_max_elapsed: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            dataset_id: config.dataset.dataset_id.clone(),
            page_size: config.dataset.page_size,
            max_pages: config.dataset.max_pages,
            fetch_batch_size: config.dataset.fetch_batch_size,
            halt_on_error: config.pipeline.halt_on_error,
            connect_max_elapsed: config.connect_max_elapsed(),
        }
    }
}

/// Owns an open session and releases it on every exit path.
///
/// [`SessionGuard::close`] is the normal path. If the guard is dropped
/// first (a panic or a cancelled run), the close is spawned on the runtime.
struct SessionGuard {
    session: Arc<dyn DatasetSession>,
    closed: bool,
}

impl SessionGuard {
    fn new(session: Box<dyn DatasetSession>) -> Self {
        Self {
            session: Arc::from(session),
            closed: false,
        }
    }

    fn session(&self) -> &dyn DatasetSession {
        self.session.as_ref()
    }

    async fn close(mut self) {
        self.session.close().await;
        self.closed = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Run ended without closing the dataset session, closing in background");
                let session = Arc::clone(&self.session);
                handle.spawn(async move { session.close().await });
            }
            Err(_) => warn!("Dataset session dropped outside a runtime"),
        }
    }
}

/// Sequential transfer of one dataset into the sink
pub struct TransferPipeline {
    connector: Arc<dyn DatasetConnector>,
    uploader: SinkUploader,
    observers: Vec<Arc<dyn FetchObserver>>,
    settings: PipelineSettings,
    state: RwLock<PipelineState>,
}

impl TransferPipeline {
    pub fn new(
        connector: Arc<dyn DatasetConnector>,
        uploader: SinkUploader,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            connector,
            uploader,
            observers: Vec::new(),
            settings,
            state: RwLock::new(PipelineState::Idle),
        }
    }

    /// Register a hook that sees the fetch result before transfer starts
    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    fn transition(&self, next: PipelineState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        debug!(from = %previous, to = %next, "Pipeline state change");
    }

    /// Run the whole transfer.
    ///
    /// The session is closed on every path once it has been opened. Fatal
    /// errors abort the run; per-record failures are collected in the summary.
    #[instrument(skip(self), fields(dataset_id = %self.settings.dataset_id))]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(run_id = %run_id, "Starting dataset transfer");

        self.transition(PipelineState::Connecting);
        let session = match self.connect_with_retry().await {
            Ok(session) => session,
            Err(e) => {
                self.transition(PipelineState::Closed);
                return Err(PipelineError::Connect(e));
            }
        };

        let guard = SessionGuard::new(session);
        let outcome = self
            .run_with_session(guard.session(), run_id, started_at)
            .await;

        guard.close().await;
        self.transition(PipelineState::Closed);

        outcome
    }

    async fn connect_with_retry(&self) -> Result<Box<dyn DatasetSession>, ConnectionError> {
        if self.settings.connect_max_elapsed.is_zero() {
            return self.connector.connect().await;
        }

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.settings.connect_max_elapsed),
            ..Default::default()
        };

        backoff::future::retry_notify(
            policy,
            move || async move {
                self.connector.connect().await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            },
            |e: ConnectionError, wait: Duration| {
                warn!(
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "Dataset service connection failed, retrying"
                );
            },
        )
        .await
    }

    async fn run_with_session(
        &self,
        session: &dyn DatasetSession,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<RunSummary, PipelineError> {
        self.transition(PipelineState::Listing);
        let filter = DatasetFilter::new(self.settings.dataset_id.clone());
        let listing = CursorPaginator::new(session, self.settings.page_size, self.settings.max_pages)
            .fetch_all_identifiers(&filter)
            .await?;

        self.transition(PipelineState::Fetching);
        let FetchedRecords { records, missing } =
            BulkRecordFetcher::new(session, self.settings.fetch_batch_size)
                .fetch_records(&listing.identifiers)
                .await
                .map_err(PipelineError::Fetch)?;

        if !self.observers.is_empty() {
            self.transition(PipelineState::Persisting);
            self.notify_observers(&records).await;
        }

        self.transition(PipelineState::Transferring);
        let mut summary = RunSummary::new(run_id, self.settings.dataset_id.clone(), started_at);
        summary.pages = listing.pages;
        summary.listed = listing.identifiers.len();
        summary.fetched = records.len();

        for (index, identifier) in missing {
            metrics::counter!("transfer.records.failed").increment(1);
            summary.failures.push(RecordFailure {
                index,
                record_id: Some(identifier.file_id),
                stage: FailureStage::Fetch,
                error: "Record was not returned by BinaryDataByIDs".to_string(),
            });
        }

        if self.settings.halt_on_error && !summary.failures.is_empty() {
            summary.skipped = records.len();
            warn!(
                missing = summary.failed(),
                skipped = summary.skipped,
                "Halting transfer after fetch failures"
            );
        } else {
            self.transfer_records(&records, &mut summary).await;
        }
        summary.finished_at = Utc::now();

        info!(
            run_id = %run_id,
            listed = summary.listed,
            fetched = summary.fetched,
            transformed = summary.transformed,
            uploaded = summary.uploaded,
            failed = summary.failed(),
            skipped = summary.skipped,
            "Dataset transfer finished"
        );

        Ok(summary)
    }

    async fn notify_observers(&self, records: &[Record]) {
        for (position, observer) in self.observers.iter().enumerate() {
            if let Err(e) = observer.on_fetched(records).await {
                warn!(observer = position, error = %e, "Fetch observer failed");
            }
        }
    }

    async fn transfer_records(&self, records: &[Record], summary: &mut RunSummary) {
        let total = records.len();

        for (index, record) in records.iter().enumerate() {
            let record_id = record.id().map(str::to_string);
            info!(index = index, total = total, record_id = ?record_id, "Transferring record");

            let prepared = blob_filename(record).and_then(|filename| {
                let content = transform(record)?.to_json_bytes()?;
                Ok((filename, content))
            });

            let failure = match prepared {
                Err(e) => Some(RecordFailure {
                    index,
                    record_id,
                    stage: FailureStage::Transform,
                    error: e.to_string(),
                }),
                Ok((filename, content)) => {
                    summary.transformed += 1;

                    let started = Instant::now();
                    match self.uploader.upload(&filename, &content).await {
                        Ok(()) => {
                            summary.uploaded += 1;
                            metrics::histogram!("transfer.upload.duration_seconds")
                                .record(started.elapsed().as_secs_f64());
                            metrics::counter!("transfer.records.uploaded").increment(1);
                            metrics::counter!("transfer.bytes.uploaded")
                                .increment(content.len() as u64);
                            None
                        }
                        Err(e) => Some(RecordFailure {
                            index,
                            record_id,
                            stage: FailureStage::Upload,
                            error: e.to_string(),
                        }),
                    }
                }
            };

            if let Some(failure) = failure {
                warn!(
                    index = failure.index,
                    record_id = ?failure.record_id,
                    stage = ?failure.stage,
                    error = %failure.error,
                    "Record transfer failed"
                );
                metrics::counter!("transfer.records.failed").increment(1);
                summary.failures.push(failure);

                if self.settings.halt_on_error {
                    summary.skipped = total - index - 1;
                    warn!(skipped = summary.skipped, "Halting transfer after failure");
                    break;
                }
            }
        }
    }
}
