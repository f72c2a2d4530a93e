//! Paginated retrieval from the time-series service.
//!
//! The service answers history queries one offset/limit window at a time.
//! A [`PageCursor`] stitches those windows into one ordered, forward-only
//! sequence:
//!
//! ```ignore
//! let reader = PaginatedReader::new(&ctx, 100)?;
//! let mut cursor = reader.open(HistoryQuery::entity("Room1").with_type("Room"))?;
//! loop {
//!     let page = cursor.next_page()?;
//!     handle(page.records);
//!     if page.done {
//!         break;
//!     }
//! }
//! ```

mod reader;
mod types;

pub use reader::{PageCursor, PaginatedReader, Records, DEFAULT_PAGE_SIZE};
pub use types::{
    AggrMethod, AggrPeriod, HistoryQuery, HistoryRecord, Page, PageRequest, PageResponse,
};
