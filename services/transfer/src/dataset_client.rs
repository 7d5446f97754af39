//! Seam between the pipeline and the remote dataset service.
//!
//! The pipeline only talks to [`DatasetConnector`] and [`DatasetSession`];
//! the tonic implementation lives in [`crate::grpc_client`].

use crate::record::{Cursor, DatasetFilter, IdentifierPage, Record, RecordIdentifier};
use async_trait::async_trait;
use thiserror::Error;
use tonic::Code;

/// Errors raised while talking to the dataset service
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid dataset endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("{method} failed with {code:?}: {message}")]
    Status {
        method: &'static str,
        code: Code,
        message: String,
    },

    #[error("Malformed response from {method}: {message}")]
    MalformedResponse {
        method: &'static str,
        message: String,
    },

    #[error("Identifier at position {position} is not well formed: {identifier:?}")]
    InvalidIdentifier {
        position: usize,
        identifier: RecordIdentifier,
    },

    #[error("Session is closed")]
    SessionClosed,
}

impl ConnectionError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectionError::Transport(_) => true,
            ConnectionError::Status { code, .. } => matches!(
                code,
                Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted
            ),
            _ => false,
        }
    }
}

/// Opens authenticated sessions against the dataset service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatasetConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DatasetSession>, ConnectionError>;
}

/// An open session; must be closed by its owner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatasetSession: Send + Sync {
    /// Request one page of identifiers matching `filter`, starting after `last`
    async fn binary_ids_by_filter(
        &self,
        filter: &DatasetFilter,
        last: Option<Cursor>,
        limit: u64,
    ) -> Result<IdentifierPage, ConnectionError>;

    /// Retrieve full records for `identifiers` in a single call
    async fn binary_data_by_ids(
        &self,
        identifiers: &[RecordIdentifier],
    ) -> Result<Vec<Record>, ConnectionError>;

    /// Release the session
    async fn close(&self);
}
