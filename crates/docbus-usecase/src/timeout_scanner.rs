//! Timeout Scanner - Discovers due timeouts through a lagging index
//!
//! Each `get_next_chunk` call:
//! 1. occasionally runs a cleanup scan for entries well before the start
//!    slice, which a stale index may have hidden from earlier scans
//! 2. pages through `start_slice <= time <= now`
//! 3. works out when the caller should scan again
//!
//! The index may lag writes and skip rows while it catches up. Pages are
//! walked with a `PageCursor`; a stale index that returned nothing asks
//! for an immediate rescan.
//!
//! Shutdown is cooperative. It is observed between page fetches and ends
//! the call with whatever was collected so far.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use docbus_domain::model::endpoint::EndpointName;
use docbus_domain::model::timeout::{TimeoutEntry, TimeoutsChunk};
use docbus_domain::repository::clock::{Clock, SystemClock};
use docbus_domain::repository::document_store::DocumentStore;
use docbus_domain::repository::timeout_index::{QueryStatistics, TimeoutQuery, MAX_PAGE_SIZE};
use docbus_domain::service::page_cursor::PageCursor;
use shared::{Result, TimeoutConfig};

/// Watermark value before the first cleanup
const NEVER: i64 = i64::MIN;

/// Scanner tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutScannerSettings {
    /// How often the cleanup scan runs
    pub trigger_cleanup_every: Duration,
    /// Cleanup covers entries due this long before the start slice
    pub cleanup_gap_from_timeslice: Duration,
    pub max_page_size: usize,
    /// Next poll delay when no future timeout is known
    pub default_next_poll: Duration,
}

impl Default for TimeoutScannerSettings {
    fn default() -> Self {
        Self {
            trigger_cleanup_every: Duration::minutes(2),
            cleanup_gap_from_timeslice: Duration::minutes(1),
            max_page_size: MAX_PAGE_SIZE,
            default_next_poll: Duration::minutes(10),
        }
    }
}

impl From<&TimeoutConfig> for TimeoutScannerSettings {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            trigger_cleanup_every: secs(config.trigger_cleanup_every_secs),
            cleanup_gap_from_timeslice: secs(config.cleanup_gap_from_timeslice_secs),
            max_page_size: config.max_page_size.clamp(1, MAX_PAGE_SIZE),
            default_next_poll: secs(config.default_next_poll_secs),
        }
    }
}

/// Longest configurable period, one year
const MAX_CONFIG_SECS: i64 = 365 * 24 * 60 * 60;

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(MAX_CONFIG_SECS))
}

enum ScanOutcome {
    Completed(Option<QueryStatistics>),
    Cancelled,
}

/// Rows collected by one `get_next_chunk` call, first sighting wins
#[derive(Default)]
struct Collected {
    entries: Vec<TimeoutEntry>,
    seen: HashSet<String>,
}

impl Collected {
    fn push(&mut self, entry: TimeoutEntry) {
        if self.seen.insert(entry.id.clone()) {
            self.entries.push(entry);
        }
    }
}

/// Timeout scanner for one endpoint
pub struct TimeoutScanner {
    store: Arc<dyn DocumentStore>,
    endpoint: EndpointName,
    settings: TimeoutScannerSettings,
    clock: Arc<dyn Clock>,
    /// Millis since epoch of the last completed cleanup, `NEVER` before the first
    last_cleanup: AtomicI64,
    shutdown: watch::Sender<bool>,
}

impl TimeoutScanner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        endpoint: EndpointName,
        settings: TimeoutScannerSettings,
    ) -> Self {
        Self {
            store,
            endpoint,
            settings,
            clock: Arc::new(SystemClock),
            last_cleanup: AtomicI64::new(NEVER),
            shutdown: watch::Sender::new(false),
        }
    }

    /// Builder: replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    pub fn settings(&self) -> &TimeoutScannerSettings {
        &self.settings
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// When the last cleanup scan completed
    pub fn last_cleanup_time(&self) -> Option<DateTime<Utc>> {
        match self.last_cleanup.load(Ordering::Acquire) {
            NEVER => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    /// Make the next `get_next_chunk` run a cleanup scan
    pub fn reset_cleanup_watermark(&self) {
        self.last_cleanup.store(NEVER, Ordering::Release);
    }

    fn cleanup_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_cleanup_time() {
            None => true,
            Some(last) => now - last >= self.settings.trigger_cleanup_every,
        }
    }

    fn mark_cleanup(&self) {
        let completed = self.clock.now();
        self.last_cleanup
            .store(completed.timestamp_millis(), Ordering::Release);
    }

    /// Stop scanning, in-flight and future calls return early
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(endpoint = %self.endpoint, "Timeout scanner shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that observes `shutdown`
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn owner_query(&self) -> TimeoutQuery {
        TimeoutQuery::visible_to(self.endpoint.clone())
    }

    /// Upper bound of the cleanup scan, clamped at the earliest instant
    fn cleanup_query(&self, start_slice: DateTime<Utc>) -> TimeoutQuery {
        let until = start_slice
            .checked_sub_signed(self.settings.cleanup_gap_from_timeslice)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.owner_query().due_until(until)
    }

    /// Poll time when nothing sooner is known, clamped at the latest instant
    fn default_poll_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.settings.default_next_poll)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn retry_later(&self, collected: Collected, now: DateTime<Utc>) -> TimeoutsChunk {
        debug!(
            endpoint = %self.endpoint,
            count = collected.entries.len(),
            "Scan cancelled, returning partial results"
        );
        TimeoutsChunk::new(collected.entries, self.default_poll_after(now))
    }

    /// Page through `query` until the index has served everything it reports
    async fn scan(&self, query: TimeoutQuery, collected: &mut Collected) -> Result<ScanOutcome> {
        let mut cursor = PageCursor::new();

        while cursor.has_more() {
            if self.is_shut_down() {
                return Ok(ScanOutcome::Cancelled);
            }

            let page_query = query
                .clone()
                .page(cursor.next_skip(), self.settings.max_page_size);
            let page = self.store.query_timeouts(&page_query).await?;
            let page_len = page.results.len();
            for entry in page.results {
                collected.push(entry);
            }

            if self.is_shut_down() {
                return Ok(ScanOutcome::Cancelled);
            }

            cursor.advance(page_len, page.statistics);
            debug!(
                endpoint = %self.endpoint,
                skip = page_query.skip,
                count = page_len,
                received = cursor.received(),
                total = page.statistics.total_results,
                skipped = page.statistics.skipped_results,
                stale = page.statistics.is_stale,
                "Timeout page received"
            );
        }

        Ok(ScanOutcome::Completed(cursor.last_statistics()))
    }

    /// Earliest due time after `now`, if the index knows one
    async fn next_due_time(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let query = self.owner_query().due_after(now).page(0, 1);
        let page = self.store.query_timeouts(&query).await?;
        Ok(page.results.first().map(|entry| entry.time))
    }

    /// Timeouts due since `start_slice`, plus when to scan next
    pub async fn get_next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutsChunk> {
        let now = self.clock.now();
        let mut collected = Collected::default();

        if self.cleanup_due(now) {
            match self.scan(self.cleanup_query(start_slice), &mut collected).await? {
                ScanOutcome::Cancelled => return Ok(self.retry_later(collected, now)),
                ScanOutcome::Completed(_) => {
                    self.mark_cleanup();
                    info!(
                        endpoint = %self.endpoint,
                        count = collected.entries.len(),
                        "Timeout cleanup scan completed"
                    );
                }
            }
        }

        let main_query = self.owner_query().due_from(start_slice).due_until(now);
        let statistics = match self.scan(main_query, &mut collected).await? {
            ScanOutcome::Cancelled => return Ok(self.retry_later(collected, now)),
            ScanOutcome::Completed(statistics) => statistics.unwrap_or_default(),
        };

        let mut next_poll = match self.next_due_time(now).await? {
            Some(due) => due,
            None => self.default_poll_after(now),
        };
        if statistics.is_stale && collected.entries.is_empty() {
            next_poll = now;
        }

        debug!(
            endpoint = %self.endpoint,
            count = collected.entries.len(),
            next_poll = %next_poll,
            "Timeout chunk ready"
        );
        Ok(TimeoutsChunk::new(collected.entries, next_poll))
    }

    /// Run the cleanup scan on its own
    ///
    /// The watermark only moves when the scan completes.
    pub async fn get_cleanup_chunk(&self, start_slice: DateTime<Utc>) -> Result<Vec<TimeoutEntry>> {
        let mut collected = Collected::default();
        if let ScanOutcome::Completed(_) =
            self.scan(self.cleanup_query(start_slice), &mut collected).await?
        {
            self.mark_cleanup();
        }
        Ok(collected.entries)
    }
}
