use crate::dataset_client::{ConnectionError, DatasetSession};
use crate::record::{Cursor, DatasetFilter, RecordIdentifier};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors that abort identifier listing
#[derive(Debug, Error)]
pub enum PaginationError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Pagination exceeded {max_pages} pages without reaching the end")]
    PageLimitExceeded { max_pages: usize },

    #[error("Cursor {cursor} repeated on page {page}; the service is not advancing")]
    CursorNotAdvancing { cursor: String, page: usize },
}

/// Result of a complete listing
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Identifiers from every page, in encounter order
    pub identifiers: Vec<RecordIdentifier>,
    /// Number of pages requested, including the terminating one
    pub pages: usize,
}

/// Walks the cursor protocol until the service reports no more pages
pub struct CursorPaginator<'a> {
    session: &'a dyn DatasetSession,
    page_size: u64,
    max_pages: usize,
}

impl<'a> CursorPaginator<'a> {
    pub fn new(session: &'a dyn DatasetSession, page_size: u64, max_pages: usize) -> Self {
        Self {
            session,
            page_size,
            max_pages,
        }
    }

    /// Accumulate every identifier matching `filter`.
    ///
    /// Stops on an empty batch or a missing cursor. Identifiers repeated
    /// across pages are kept. Any failure discards the partial listing.
    #[instrument(skip(self, filter), fields(dataset_id = %filter.dataset_id))]
    pub async fn fetch_all_identifiers(
        &self,
        filter: &DatasetFilter,
    ) -> Result<Listing, PaginationError> {
        let mut listing = Listing::default();
        let mut cursor: Option<Cursor> = None;
        let mut seen_cursors: HashSet<Cursor> = HashSet::new();

        loop {
            if listing.pages >= self.max_pages {
                return Err(PaginationError::PageLimitExceeded {
                    max_pages: self.max_pages,
                });
            }

            let page = self
                .session
                .binary_ids_by_filter(filter, cursor.clone(), self.page_size)
                .await?;
            listing.pages += 1;
            metrics::counter!("transfer.pages.listed").increment(1);

            if page.identifiers.is_empty() {
                break;
            }

            debug!(
                page = listing.pages,
                count = page.identifiers.len(),
                "Accumulated identifier page"
            );
            listing.identifiers.extend(page.identifiers);

            match page.next {
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(PaginationError::CursorNotAdvancing {
                            cursor: next.to_string(),
                            page: listing.pages,
                        });
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        info!(
            identifiers = listing.identifiers.len(),
            pages = listing.pages,
            "Identifier listing complete"
        );

        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset_client::MockDatasetSession;
    use crate::record::IdentifierPage;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn ids(names: &[&str]) -> Vec<RecordIdentifier> {
        names
            .iter()
            .map(|n| RecordIdentifier::new(*n, "org", "loc"))
            .collect()
    }

    fn page(names: &[&str], next: Option<&str>) -> IdentifierPage {
        IdentifierPage {
            identifiers: ids(names),
            next: next.and_then(Cursor::from_token),
        }
    }

    #[tokio::test]
    async fn test_accumulates_pages_until_empty_batch() {
        let mut session = MockDatasetSession::new();
        let mut seq = Sequence::new();

        session
            .expect_binary_ids_by_filter()
            .with(eq(DatasetFilter::new("ds")), eq(None::<Cursor>), eq(2u64))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(page(&["a", "b"], Some("c1"))));
        session
            .expect_binary_ids_by_filter()
            .with(eq(DatasetFilter::new("ds")), eq(Cursor::from_token("c1")), eq(2u64))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(page(&["c", "a"], Some("c2"))));
        session
            .expect_binary_ids_by_filter()
            .with(eq(DatasetFilter::new("ds")), eq(Cursor::from_token("c2")), eq(2u64))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(page(&[], None)));

        let paginator = CursorPaginator::new(&session, 2, 100);
        let listing = paginator
            .fetch_all_identifiers(&DatasetFilter::new("ds"))
            .await
            .unwrap();

        // Duplicates across pages are not removed
        assert_eq!(listing.identifiers, ids(&["a", "b", "c", "a"]));
        assert_eq!(listing.pages, 3);
    }

    #[tokio::test]
    async fn test_missing_cursor_ends_listing() {
        let mut session = MockDatasetSession::new();
        session
            .expect_binary_ids_by_filter()
            .times(1)
            .returning(|_, _, _| Ok(page(&["a"], None)));

        let paginator = CursorPaginator::new(&session, 10, 100);
        let listing = paginator
            .fetch_all_identifiers(&DatasetFilter::new("ds"))
            .await
            .unwrap();

        assert_eq!(listing.identifiers, ids(&["a"]));
        assert_eq!(listing.pages, 1);
    }

    #[tokio::test]
    async fn test_empty_dataset() {
        let mut session = MockDatasetSession::new();
        session
            .expect_binary_ids_by_filter()
            .times(1)
            .returning(|_, _, _| Ok(IdentifierPage::default()));

        let paginator = CursorPaginator::new(&session, 10, 100);
        let listing = paginator
            .fetch_all_identifiers(&DatasetFilter::new("ds"))
            .await
            .unwrap();

        assert!(listing.identifiers.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_cursor_fails_fast() {
        let mut session = MockDatasetSession::new();
        session
            .expect_binary_ids_by_filter()
            .times(2)
            .returning(|_, _, _| Ok(page(&["a"], Some("stuck"))));

        let paginator = CursorPaginator::new(&session, 10, 100);
        let result = paginator
            .fetch_all_identifiers(&DatasetFilter::new("ds"))
            .await;

        match result {
            Err(PaginationError::CursorNotAdvancing { cursor, page }) => {
                assert_eq!(cursor, "stuck");
                assert_eq!(page, 2);
            }
            other => panic!("Expected CursorNotAdvancing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_page_limit_enforced() {
        let mut session = MockDatasetSession::new();
        let mut counter = 0;
        session
            .expect_binary_ids_by_filter()
            .times(3)
            .returning(move |_, _, _| {
                counter += 1;
                Ok(page(&["a"], Some(&format!("c{counter}"))))
            });

        let paginator = CursorPaginator::new(&session, 10, 3);
        let result = paginator
            .fetch_all_identifiers(&DatasetFilter::new("ds"))
            .await;

        assert!(matches!(
            result,
            Err(PaginationError::PageLimitExceeded { max_pages: 3 })
        ));
    }

    #[tokio::test]
    async fn test_connection_failure_discards_partial_listing() {
        let mut session = MockDatasetSession::new();
        let mut seq = Sequence::new();
        session
            .expect_binary_ids_by_filter()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(page(&["a"], Some("c1"))));
        session
            .expect_binary_ids_by_filter()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(ConnectionError::Transport("reset".to_string())));

        let paginator = CursorPaginator::new(&session, 10, 100);
        let result = paginator
            .fetch_all_identifiers(&DatasetFilter::new("ds"))
            .await;

        assert!(matches!(
            result,
            Err(PaginationError::Connection(ConnectionError::Transport(_)))
        ));
    }
}
