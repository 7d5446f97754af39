//! Record to transfer-document mapping.
//!
//! Pure functions only: no I/O and no state shared between records.

use crate::record::Record;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that prevent one record from being transformed
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Record has no metadata")]
    MissingMetadata,

    #[error("Record metadata has an empty id")]
    MissingRecordId,

    #[error("Failed to serialize transfer document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Labeled box as written to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Self-describing JSON document uploaded per record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDocument {
    /// Base64-encoded payload
    pub data: String,
    /// Capture tags, source order, duplicates kept
    pub labels: Vec<String>,
    /// One entry per bounding box, source order
    pub detections: Vec<Detection>,
}

impl TransferDocument {
    /// Serialize to UTF-8 JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, TransformError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Build the transfer document for `record`.
///
/// Coordinates pass through unchanged, including values outside [0, 1].
pub fn transform(record: &Record) -> Result<TransferDocument, TransformError> {
    let metadata = record
        .metadata
        .as_ref()
        .ok_or(TransformError::MissingMetadata)?;

    let detections = metadata
        .bounding_boxes
        .iter()
        .map(|bbox| Detection {
            label: bbox.label.clone(),
            x_min: bbox.x_min,
            y_min: bbox.y_min,
            x_max: bbox.x_max,
            y_max: bbox.y_max,
        })
        .collect();

    Ok(TransferDocument {
        data: STANDARD.encode(&record.payload),
        labels: metadata.tags.clone(),
        detections,
    })
}

/// Blob name for `record`: `{record-id}.json`
pub fn blob_filename(record: &Record) -> Result<String, TransformError> {
    let metadata = record
        .metadata
        .as_ref()
        .ok_or(TransformError::MissingMetadata)?;

    if metadata.id.is_empty() {
        return Err(TransformError::MissingRecordId);
    }

    Ok(format!("{}.json", metadata.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BoundingBox, RecordMetadata};

    fn annotated_record() -> Record {
        Record {
            payload: vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10],
            metadata: Some(RecordMetadata {
                id: "65f1c2".to_string(),
                organization_id: "org".to_string(),
                location_id: "loc".to_string(),
                tags: vec!["ok".to_string(), "line-2".to_string(), "ok".to_string()],
                bounding_boxes: vec![
                    BoundingBox {
                        label: "bolt".to_string(),
                        x_min: 0.1,
                        y_min: 0.2,
                        x_max: 0.5,
                        y_max: 0.6,
                    },
                    BoundingBox {
                        label: "nut".to_string(),
                        x_min: -0.25,
                        y_min: 0.0,
                        x_max: 1.5,
                        y_max: 1.0,
                    },
                ],
            }),
        }
    }

    #[test]
    fn test_transform_preserves_order_and_duplicates() {
        let doc = transform(&annotated_record()).unwrap();
        assert_eq!(doc.labels, vec!["ok", "line-2", "ok"]);
        assert_eq!(doc.detections.len(), 2);
        assert_eq!(doc.detections[0].label, "bolt");
        assert_eq!(doc.detections[1].label, "nut");
    }

    #[test]
    fn test_out_of_range_coordinates_pass_through() {
        let doc = transform(&annotated_record()).unwrap();
        assert_eq!(doc.detections[1].x_min, -0.25);
        assert_eq!(doc.detections[1].x_max, 1.5);
    }

    #[test]
    fn test_data_decodes_to_payload() {
        let record = annotated_record();
        let doc = transform(&record).unwrap();
        assert_eq!(STANDARD.decode(&doc.data).unwrap(), record.payload);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let record = annotated_record();
        let first = transform(&record).unwrap().to_json_bytes().unwrap();
        let second = transform(&record).unwrap().to_json_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_metadata_keeps_all_keys() {
        let record = Record {
            payload: b"abc".to_vec(),
            metadata: Some(RecordMetadata {
                id: "x".to_string(),
                ..Default::default()
            }),
        };

        let bytes = transform(&record).unwrap().to_json_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"data": "YWJj", "labels": [], "detections": []})
        );
    }

    #[test]
    fn test_detection_json_shape() {
        let bytes = transform(&annotated_record())
            .unwrap()
            .to_json_bytes()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value["detections"][0],
            serde_json::json!({
                "label": "bolt",
                "x_min": 0.1,
                "y_min": 0.2,
                "x_max": 0.5,
                "y_max": 0.6
            })
        );
    }

    #[test]
    fn test_missing_metadata() {
        let record = Record {
            payload: vec![1],
            metadata: None,
        };
        assert!(matches!(
            transform(&record),
            Err(TransformError::MissingMetadata)
        ));
        assert!(matches!(
            blob_filename(&record),
            Err(TransformError::MissingMetadata)
        ));
    }

    #[test]
    fn test_blob_filename() {
        assert_eq!(blob_filename(&annotated_record()).unwrap(), "65f1c2.json");

        let mut record = annotated_record();
        record.metadata.as_mut().unwrap().id.clear();
        assert!(matches!(
            blob_filename(&record),
            Err(TransformError::MissingRecordId)
        ));
    }
}
