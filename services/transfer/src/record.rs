//! Data model shared by the paginator, fetcher and transformer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compound key identifying one binary record in the dataset service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentifier {
    /// File (record) ID
    pub file_id: String,
    /// Organization that owns the record
    pub organization_id: String,
    /// Location the record was captured in
    pub location_id: String,
}

impl RecordIdentifier {
    pub fn new(
        file_id: impl Into<String>,
        organization_id: impl Into<String>,
        location_id: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            organization_id: organization_id.into(),
            location_id: location_id.into(),
        }
    }

    /// All three key parts are present
    pub fn is_well_formed(&self) -> bool {
        !self.file_id.is_empty() && !self.organization_id.is_empty() && !self.location_id.is_empty()
    }
}

impl fmt::Display for RecordIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization_id, self.location_id, self.file_id)
    }
}

/// Labeled rectangle in normalized image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Capture and annotation metadata attached to a record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Record ID, also used as the blob name
    pub id: String,
    pub organization_id: String,
    pub location_id: String,
    /// Capture tags in source order
    #[serde(default)]
    pub tags: Vec<String>,
    /// Bounding box annotations in source order
    #[serde(default)]
    pub bounding_boxes: Vec<BoundingBox>,
}

/// One fetched binary record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Raw binary payload (typically an encoded image)
    pub payload: Vec<u8>,
    /// Metadata; the service may omit it for malformed records
    pub metadata: Option<RecordMetadata>,
}

impl Record {
    /// Record ID when metadata is present and the ID is non-empty
    pub fn id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .map(|m| m.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Opaque continuation token returned by the paging service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a raw token; empty tokens signal end-of-pages and map to `None`
    pub fn from_token(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects the records belonging to one dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFilter {
    pub dataset_id: String,
}

impl DatasetFilter {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
        }
    }
}

/// One page of identifiers plus the token for the next page
#[derive(Debug, Clone, Default)]
pub struct IdentifierPage {
    pub identifiers: Vec<RecordIdentifier>,
    pub next: Option<Cursor>,
}
