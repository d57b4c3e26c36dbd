//! Page Cursor - Walking an eventually consistent index
//!
//! A naive running offset misses or repeats rows when the index skips
//! entries while it catches up. The next page therefore starts at
//! `rows received so far + skipped rows the index last reported`, and
//! paging continues until the rows received reach the index's reported
//! total.
//!
//! This is pure bookkeeping - no I/O. The scanner owns the loop.

use crate::repository::timeout_index::QueryStatistics;

/// Position of a paged scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    received: usize,
    skipped: usize,
    total: Option<usize>,
    exhausted: bool,
    last_statistics: Option<QueryStatistics>,
}

impl PageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next page
    pub fn next_skip(&self) -> usize {
        self.received + self.skipped
    }

    /// Record a page that returned `page_len` rows
    pub fn advance(&mut self, page_len: usize, statistics: QueryStatistics) {
        self.received += page_len;
        // The index reports skipped rows for the whole query so far
        self.skipped = statistics.skipped_results;
        self.total = Some(statistics.total_results);
        self.last_statistics = Some(statistics);
        // A short total with nothing left to serve ends the scan
        if page_len == 0 {
            self.exhausted = true;
        }
    }

    /// Whether another page should be requested
    pub fn has_more(&self) -> bool {
        match self.total {
            None => true,
            Some(total) => !self.exhausted && self.received < total,
        }
    }

    /// Rows received from the index so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Statistics of the most recent page
    pub fn last_statistics(&self) -> Option<QueryStatistics> {
        self.last_statistics
    }
}
