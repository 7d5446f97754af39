use crate::dataset_client::{ConnectionError, DatasetSession};
use crate::record::{Record, RecordIdentifier};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Records returned by a windowed fetch
#[derive(Debug, Default)]
pub struct FetchedRecords {
    pub records: Vec<Record>,
    /// Requested identifiers the service returned no record for, with their
    /// position in the request
    pub missing: Vec<(usize, RecordIdentifier)>,
}

/// Retrieves full records in windows of `batch_size` identifiers
pub struct BulkRecordFetcher<'a> {
    session: &'a dyn DatasetSession,
    batch_size: usize,
}

impl<'a> BulkRecordFetcher<'a> {
    pub fn new(session: &'a dyn DatasetSession, batch_size: usize) -> Self {
        Self {
            session,
            batch_size: batch_size.max(1),
        }
    }

    /// Fetch every record in `identifiers`, preserving order.
    ///
    /// All identifiers are checked before the first call; a malformed one
    /// fails the whole fetch. Each window's response is matched against the
    /// file IDs it requested, and unmatched identifiers are reported as missing.
    #[instrument(skip(self, identifiers), fields(count = identifiers.len(), batch_size = self.batch_size))]
    pub async fn fetch_records(
        &self,
        identifiers: &[RecordIdentifier],
    ) -> Result<FetchedRecords, ConnectionError> {
        if let Some((position, identifier)) = identifiers
            .iter()
            .enumerate()
            .find(|(_, id)| !id.is_well_formed())
        {
            return Err(ConnectionError::InvalidIdentifier {
                position,
                identifier: identifier.clone(),
            });
        }

        let mut fetched = FetchedRecords {
            records: Vec::with_capacity(identifiers.len()),
            missing: Vec::new(),
        };

        for (window, chunk) in identifiers.chunks(self.batch_size).enumerate() {
            let batch = self.session.binary_data_by_ids(chunk).await?;
            debug!(
                window = window,
                requested = chunk.len(),
                received = batch.len(),
                "Fetched record window"
            );

            let returned: HashSet<&str> = batch.iter().filter_map(Record::id).collect();
            let offset = window * self.batch_size;
            for (position, identifier) in chunk.iter().enumerate() {
                if !returned.contains(identifier.file_id.as_str()) {
                    warn!(
                        position = offset + position,
                        file_id = %identifier.file_id,
                        "Requested record was not returned"
                    );
                    fetched.missing.push((offset + position, identifier.clone()));
                }
            }

            fetched.records.extend(batch);
        }

        metrics::counter!("transfer.records.fetched").increment(fetched.records.len() as u64);

        info!(
            records = fetched.records.len(),
            missing = fetched.missing.len(),
            "Record fetch complete"
        );

        Ok(fetched)
    }
}
