//! Dataset Transfer Service
//!
//! Moves an annotated image dataset from the Viam data API into Azure Data
//! Lake Storage Gen2. Every record becomes one JSON blob holding the
//! base64-encoded image, its capture tags, and its bounding-box detections.
//!
//! ## Features
//!
//! - **Cursor Pagination**: Lists the dataset with opaque continuation tokens,
//!   guarded against non-advancing cursors and runaway page counts
//! - **Windowed Bulk Fetch**: Retrieves records in configurable batches
//! - **Per-Record Isolation**: A failed transform or upload is recorded in the
//!   run summary without stopping the remaining records
//! - **Optional Image Dump**: Writes fetched images to disk through a
//!   post-fetch observer
//!
//! ## Architecture
//!
//! ```text
//! Viam Data API                                          ADLS Gen2
//! ┌──────────────┐                                     ┌──────────────┐
//! │ BinaryData   │                                     │ {container}/ │
//! │ ByFilter     │───┐                                 │   {id}.json  │
//! ├──────────────┤   │                                 └──────────────┘
//! │ BinaryData   │   │                                        ▲
//! │ ByIDs        │─┐ │                                        │
//! └──────────────┘ │ │                                        │
//!                  │ ▼                                        │
//!                  │ ┌──────────────┐                  ┌──────────────┐
//!                  │ │ Cursor       │                  │ Sink         │
//!                  │ │ Paginator    │                  │ Uploader     │
//!                  │ └──────────────┘                  └──────────────┘
//!                  │        │                                 ▲
//!                  ▼        ▼                                 │
//!            ┌──────────────┐     ┌──────────────┐    ┌──────────────┐
//!            │ Bulk Record  │────▶│ Fetch        │───▶│ Record       │
//!            │ Fetcher      │     │ Observers    │    │ Transformer  │
//!            └──────────────┘     └──────────────┘    └──────────────┘
//! ```

pub mod config;
pub mod datalake_uploader;
pub mod dataset_client;
pub mod fetcher;
pub mod grpc_client;
pub mod image_persister;
pub mod paginator;
pub mod pipeline;
pub mod proto;
pub mod record;
pub mod transform;

pub use config::Config;
pub use datalake_uploader::{BlobStore, DataLakeClient, SinkUploader, UploadError, UploadStage};
pub use dataset_client::{ConnectionError, DatasetConnector, DatasetSession};
pub use fetcher::{BulkRecordFetcher, FetchedRecords};
pub use grpc_client::{GrpcDatasetConnector, GrpcDatasetSession};
pub use image_persister::{FetchObserver, ImagePersister, PersistError};
pub use paginator::{CursorPaginator, Listing, PaginationError};
pub use pipeline::{
    FailureStage, PipelineError, PipelineSettings, PipelineState, RecordFailure, RunSummary,
    TransferPipeline,
};
pub use record::{BoundingBox, Cursor, DatasetFilter, Record, RecordIdentifier, RecordMetadata};
pub use transform::{blob_filename, transform, Detection, TransferDocument, TransformError};
