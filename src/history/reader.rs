//! Cursor over paginated history requests.

use crate::client::ClientContext;
use crate::error::{ClientError, Result};
use tracing::{debug, warn};

use super::types::{HistoryQuery, HistoryRecord, Page, PageRequest};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Opens cursors over history queries with a fixed page size.
pub struct PaginatedReader<'a> {
    ctx: &'a ClientContext,
    page_size: usize,
}

impl<'a> PaginatedReader<'a> {
    /// Reader requesting `page_size` records per page. Fails if zero.
    pub fn new(ctx: &'a ClientContext, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(ClientError::Validation(
                "page size must be at least 1".to_string(),
            ));
        }
        Ok(Self { ctx, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Start a fresh cursor at offset zero. No request is issued until the
    /// first [`PageCursor::next_page`].
    pub fn open(&self, query: HistoryQuery) -> Result<PageCursor<'a>> {
        query.validate()?;
        Ok(PageCursor {
            ctx: self.ctx,
            query,
            offset: 0,
            limit: self.page_size,
            total_hint: None,
            state: CursorState::Open,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CursorState {
    Open,
    Done,
    Failed,
}

/// Forward-only position in a paginated result set.
///
/// Each [`next_page`](Self::next_page) on a live cursor issues exactly one
/// page request. The cursor is not restartable; open a new one instead.
pub struct PageCursor<'a> {
    ctx: &'a ClientContext,
    query: HistoryQuery,
    offset: usize,
    limit: usize,
    total_hint: Option<usize>,
    state: CursorState,
}

impl<'a> PageCursor<'a> {
    /// Fetch the next page.
    ///
    /// The page is the last one when it is empty, or when it is shorter than
    /// the limit and the total-count hint (if any) confirms nothing is left.
    /// Once done, further calls return an empty done page without a request.
    /// A failed request closes the cursor for good.
    pub fn next_page(&mut self) -> Result<Page> {
        match self.state {
            CursorState::Done => {
                return Ok(Page {
                    records: Vec::new(),
                    done: true,
                })
            }
            CursorState::Failed => return Err(ClientError::CursorClosed),
            CursorState::Open => {}
        }

        let request = PageRequest {
            query: self.query.clone(),
            offset: self.offset,
            limit: self.limit,
        };
        debug!(entity_id = %self.query.entity_id, offset = self.offset, limit = self.limit, "fetching history page");

        let response = match self.ctx.transport().fetch_history_page(self.ctx.header(), &request) {
            Ok(response) => response,
            Err(e) => {
                warn!(entity_id = %self.query.entity_id, offset = self.offset, error = %e, "history page failed");
                self.state = CursorState::Failed;
                return Err(ClientError::PageFetch(e));
            }
        };

        let returned = response.records.len();
        self.offset += returned;
        if response.total_count.is_some() {
            self.total_hint = response.total_count;
        }

        let exhausted = self.total_hint.map_or(true, |total| self.offset >= total);
        let done = returned == 0 || (returned < self.limit && exhausted);
        if done {
            self.state = CursorState::Done;
        }

        Ok(Page {
            records: response.records,
            done,
        })
    }

    /// Records consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total count reported by the service, if any.
    pub fn total_hint(&self) -> Option<usize> {
        self.total_hint
    }

    pub fn is_done(&self) -> bool {
        self.state == CursorState::Done
    }

    /// Iterate over records, fetching pages as needed. The iterator stops
    /// after the first error.
    pub fn records(self) -> Records<'a> {
        Records {
            cursor: self,
            buffer: Vec::new().into_iter(),
            finished: false,
        }
    }
}

/// Record-by-record view of a [`PageCursor`].
pub struct Records<'a> {
    cursor: PageCursor<'a>,
    buffer: std::vec::IntoIter<HistoryRecord>,
    finished: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<HistoryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.next() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            match self.cursor.next_page() {
                Ok(page) => {
                    self.finished = page.done;
                    self.buffer = page.records.into_iter();
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::error::TransportError;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn dataset(n: usize) -> Vec<HistoryRecord> {
        (0..n)
            .map(|i| HistoryRecord::new(format!("2024-01-01T00:{:02}:00.000", i)).with_value("temperature", json!(i)))
            .collect()
    }

    fn context(mock: Arc<MockTransport>) -> ClientContext {
        ClientContext::new(ClientConfig::default(), mock).unwrap()
    }

    #[test]
    fn test_twenty_five_records_in_pages_of_ten() {
        let mock = Arc::new(MockTransport::with_history(dataset(25), true));
        let ctx = context(mock.clone());
        let reader = PaginatedReader::new(&ctx, 10).unwrap();
        let mut cursor = reader.open(HistoryQuery::entity("Room1")).unwrap();

        let sizes: Vec<(usize, bool)> = (0..3)
            .map(|_| {
                let page = cursor.next_page().unwrap();
                (page.records.len(), page.done)
            })
            .collect();
        assert_eq!(sizes, vec![(10, false), (10, false), (5, true)]);
        assert_eq!(mock.history_requests(), 3);

        // exhausted: no further request
        let page = cursor.next_page().unwrap();
        assert!(page.done && page.records.is_empty());
        assert_eq!(mock.history_requests(), 3);
    }

    #[test]
    fn test_capped_pages_continue_until_total() {
        let mock = Arc::new(MockTransport::with_history(dataset(25), true).with_max_page(4));
        let ctx = context(mock.clone());
        let mut cursor = PaginatedReader::new(&ctx, 10)
            .unwrap()
            .open(HistoryQuery::entity("Room1"))
            .unwrap();

        let mut records = Vec::new();
        let mut offsets = Vec::new();
        loop {
            let page = cursor.next_page().unwrap();
            assert!(page.records.len() < 10);
            records.extend(page.records);
            offsets.push(cursor.offset());
            if page.done {
                break;
            }
        }

        assert_eq!(records, dataset(25));
        assert_eq!(offsets, vec![4, 8, 12, 16, 20, 24, 25]);
        assert_eq!(mock.history_requests(), 7);
        assert_eq!(cursor.total_hint(), Some(25));
    }

    #[test]
    fn test_capped_page_without_hint_ends_sequence() {
        let mock = Arc::new(MockTransport::with_history(dataset(25), false).with_max_page(4));
        let ctx = context(mock.clone());
        let mut cursor = PaginatedReader::new(&ctx, 10)
            .unwrap()
            .open(HistoryQuery::entity("Room1"))
            .unwrap();

        let page = cursor.next_page().unwrap();
        assert_eq!(page.records.len(), 4);
        assert!(page.done);
        assert_eq!(mock.history_requests(), 1);
    }

    #[test]
    fn test_exact_multiple_needs_empty_page_without_hint() {
        let mock = Arc::new(MockTransport::with_history(dataset(20), false));
        let ctx = context(mock.clone());
        let mut cursor = PaginatedReader::new(&ctx, 10)
            .unwrap()
            .open(HistoryQuery::entity("Room1"))
            .unwrap();

        assert!(!cursor.next_page().unwrap().done);
        assert!(!cursor.next_page().unwrap().done);
        let last = cursor.next_page().unwrap();
        assert!(last.done && last.records.is_empty());
        assert_eq!(mock.history_requests(), 3);
    }

    #[test]
    fn test_failure_closes_cursor() {
        let mock = Arc::new(MockTransport::with_history(dataset(25), true));
        let ctx = context(mock.clone());
        let mut cursor = PaginatedReader::new(&ctx, 10)
            .unwrap()
            .open(HistoryQuery::entity("Room1"))
            .unwrap();

        cursor.next_page().unwrap();
        mock.fail_next(TransportError::Http("connection reset".to_string()));
        assert!(matches!(cursor.next_page(), Err(ClientError::PageFetch(_))));
        assert_eq!(cursor.offset(), 10);
        assert!(matches!(cursor.next_page(), Err(ClientError::CursorClosed)));
        assert_eq!(mock.history_requests(), 2);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let ctx = context(Arc::new(MockTransport::new()));
        assert!(matches!(
            PaginatedReader::new(&ctx, 0),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn test_records_iterator_preserves_order() {
        let mock = Arc::new(MockTransport::with_history(dataset(7), true));
        let ctx = context(mock);
        let cursor = PaginatedReader::new(&ctx, 3)
            .unwrap()
            .open(HistoryQuery::entity("Room1"))
            .unwrap();

        let values: Vec<_> = cursor
            .records()
            .map(|r| r.unwrap().values["temperature"].clone())
            .collect();
        assert_eq!(values, (0..7).map(|i| json!(i)).collect::<Vec<_>>());
    }
}
