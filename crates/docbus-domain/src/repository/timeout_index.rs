//! Timeout Index - Query shape and statistics of the timeout index
//!
//! The index is only eventually consistent. Every page reports:
//! - `is_stale`: the index has not caught up with all writes
//! - `total_results`: how many entries match, as the index sees it now
//! - `skipped_results`: rows the index skipped while serving the page,
//!   which shifts the offset the next page must start from
//!
//! A strongly consistent backend reports `is_stale = false` and
//! `skipped_results = 0`.

use std::ops::{Bound, RangeBounds};

use chrono::{DateTime, Utc};

use crate::model::endpoint::EndpointName;
use crate::model::timeout::TimeoutEntry;

/// Default page size, the largest page the index serves
pub const MAX_PAGE_SIZE: usize = 1024;

/// A query over due times, restricted to what one endpoint may see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutQuery {
    /// Matches entries owned by this endpoint or unowned
    pub owner: EndpointName,
    pub from: Bound<DateTime<Utc>>,
    pub until: Bound<DateTime<Utc>>,
    pub skip: usize,
    pub take: usize,
}

impl TimeoutQuery {
    /// Everything visible to `owner`, first page
    pub fn visible_to(owner: EndpointName) -> Self {
        Self {
            owner,
            from: Bound::Unbounded,
            until: Bound::Unbounded,
            skip: 0,
            take: MAX_PAGE_SIZE,
        }
    }

    /// Builder: `time >= start`
    pub fn due_from(mut self, start: DateTime<Utc>) -> Self {
        self.from = Bound::Included(start);
        self
    }

    /// Builder: `time > after`
    pub fn due_after(mut self, after: DateTime<Utc>) -> Self {
        self.from = Bound::Excluded(after);
        self
    }

    /// Builder: `time <= end`
    pub fn due_until(mut self, end: DateTime<Utc>) -> Self {
        self.until = Bound::Included(end);
        self
    }

    /// Builder: page window
    pub fn page(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    /// Whether an entry satisfies the filter (paging aside)
    pub fn matches(&self, entry: &TimeoutEntry) -> bool {
        entry.is_visible_to(&self.owner) && (self.from, self.until).contains(&entry.time)
    }
}

/// Index statistics reported with each page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStatistics {
    pub is_stale: bool,
    pub total_results: usize,
    pub skipped_results: usize,
}

/// One page of query results
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage<T> {
    pub results: Vec<T>,
    pub statistics: QueryStatistics,
}

impl<T> QueryPage<T> {
    pub fn new(results: Vec<T>, statistics: QueryStatistics) -> Self {
        Self {
            results,
            statistics,
        }
    }
}
