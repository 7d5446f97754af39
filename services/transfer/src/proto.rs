//! Wire messages for the subset of the Viam data and auth APIs used here.
//!
//! Field tags mirror `proto/viam/app/data/v1/data.proto` and
//! `proto/rpc/v1/auth.proto`; unused fields are omitted.

use crate::record::{BoundingBox as DomainBoundingBox, Record, RecordIdentifier, RecordMetadata};

pub const AUTHENTICATE_PATH: &str = "/proto.rpc.v1.AuthService/Authenticate";
pub const BINARY_DATA_BY_FILTER_PATH: &str = "/viam.app.data.v1.DataService/BinaryDataByFilter";
pub const BINARY_DATA_BY_IDS_PATH: &str = "/viam.app.data.v1.DataService/BinaryDataByIDs";

/// Credential type for API key authentication
pub const API_KEY_CREDENTIALS: &str = "api-key";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Credentials {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub payload: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthenticateRequest {
    #[prost(string, tag = "1")]
    pub entity: String,
    #[prost(message, optional, tag = "2")]
    pub credentials: Option<Credentials>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthenticateResponse {
    #[prost(string, tag = "1")]
    pub access_token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Filter {
    #[prost(string, tag = "16")]
    pub dataset_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataRequest {
    #[prost(message, optional, tag = "1")]
    pub filter: Option<Filter>,
    #[prost(uint64, tag = "2")]
    pub limit: u64,
    #[prost(string, tag = "3")]
    pub last: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryDataByFilterRequest {
    #[prost(message, optional, tag = "1")]
    pub data_request: Option<DataRequest>,
    #[prost(bool, tag = "2")]
    pub include_binary: bool,
    #[prost(bool, tag = "3")]
    pub count_only: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryDataByFilterResponse {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<BinaryData>,
    #[prost(uint64, tag = "2")]
    pub count: u64,
    #[prost(string, tag = "3")]
    pub last: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryId {
    #[prost(string, tag = "1")]
    pub file_id: String,
    #[prost(string, tag = "2")]
    pub organization_id: String,
    #[prost(string, tag = "3")]
    pub location_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryDataByIdsRequest {
    #[prost(bool, tag = "2")]
    pub include_binary: bool,
    #[prost(message, repeated, tag = "3")]
    pub binary_ids: Vec<BinaryId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryDataByIdsResponse {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<BinaryData>,
    #[prost(uint64, tag = "2")]
    pub count: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryData {
    #[prost(bytes = "vec", tag = "1")]
    pub binary: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<BinaryMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryMetadata {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub capture_metadata: Option<CaptureMetadata>,
    #[prost(string, tag = "5")]
    pub file_name: String,
    #[prost(string, tag = "6")]
    pub file_ext: String,
    #[prost(message, optional, tag = "8")]
    pub annotations: Option<Annotations>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CaptureMetadata {
    #[prost(string, tag = "1")]
    pub organization_id: String,
    #[prost(string, tag = "2")]
    pub location_id: String,
    #[prost(string, repeated, tag = "12")]
    pub tags: Vec<String>,
    #[prost(string, tag = "13")]
    pub mime_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Annotations {
    #[prost(message, repeated, tag = "1")]
    pub bboxes: Vec<BoundingBox>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BoundingBox {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub label: String,
    #[prost(double, tag = "3")]
    pub x_min_normalized: f64,
    #[prost(double, tag = "4")]
    pub y_min_normalized: f64,
    #[prost(double, tag = "5")]
    pub x_max_normalized: f64,
    #[prost(double, tag = "6")]
    pub y_max_normalized: f64,
}

impl From<&RecordIdentifier> for BinaryId {
    fn from(id: &RecordIdentifier) -> Self {
        Self {
            file_id: id.file_id.clone(),
            organization_id: id.organization_id.clone(),
            location_id: id.location_id.clone(),
        }
    }
}

impl BinaryData {
    /// Compound key of this entry, if the service returned its metadata
    pub fn identifier(&self) -> Option<RecordIdentifier> {
        let metadata = self.metadata.as_ref()?;
        let capture = metadata.capture_metadata.clone().unwrap_or_default();
        Some(RecordIdentifier::new(
            metadata.id.clone(),
            capture.organization_id,
            capture.location_id,
        ))
    }
}

impl From<BinaryData> for Record {
    fn from(data: BinaryData) -> Self {
        let metadata = data.metadata.map(|metadata| {
            let capture = metadata.capture_metadata.unwrap_or_default();
            let bounding_boxes = metadata
                .annotations
                .map(|a| a.bboxes)
                .unwrap_or_default()
                .into_iter()
                .map(|bbox| DomainBoundingBox {
                    label: bbox.label,
                    x_min: bbox.x_min_normalized,
                    y_min: bbox.y_min_normalized,
                    x_max: bbox.x_max_normalized,
                    y_max: bbox.y_max_normalized,
                })
                .collect();

            RecordMetadata {
                id: metadata.id,
                organization_id: capture.organization_id,
                location_id: capture.location_id,
                tags: capture.tags,
                bounding_boxes,
            }
        });

        Record {
            payload: data.binary,
            metadata,
        }
    }
}
