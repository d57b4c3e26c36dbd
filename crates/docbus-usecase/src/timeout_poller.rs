//! Timeout Poller - Drives the scanner and hands due timeouts on
//!
//! The poller does not spawn anything: the caller runs `run` on a task of
//! its choosing and stops it with `shutdown`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use docbus_domain::model::timeout::{TimeoutEntry, TimeoutsChunk};
use shared::{Result, TimeoutConfig};

use crate::timeout_scanner::TimeoutScanner;

/// Planned poll value while a scan is running
const SCANNING: i64 = i64::MAX;

/// Receives due timeouts
#[async_trait]
pub trait TimeoutDispatcher: Send + Sync {
    async fn dispatch(&self, timeout: &TimeoutEntry) -> Result<()>;
}

/// Poller tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPollerSettings {
    /// Shortest wait between two scans
    pub min_poll_interval: Duration,
    /// Wait after a failed dispatch
    pub dispatch_retry_delay: Duration,
}

impl Default for TimeoutPollerSettings {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for TimeoutPollerSettings {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            min_poll_interval: Duration::from_millis(config.min_poll_interval_millis),
            dispatch_retry_delay: Duration::from_secs(config.dispatch_retry_delay_secs),
        }
    }
}

pub struct TimeoutPoller {
    scanner: Arc<TimeoutScanner>,
    dispatcher: Arc<dyn TimeoutDispatcher>,
    settings: TimeoutPollerSettings,
    wake: Notify,
    /// Millis since epoch of the planned next scan
    planned_poll: AtomicI64,
}

impl TimeoutPoller {
    pub fn new(
        scanner: Arc<TimeoutScanner>,
        dispatcher: Arc<dyn TimeoutDispatcher>,
        settings: TimeoutPollerSettings,
    ) -> Self {
        Self {
            scanner,
            dispatcher,
            settings,
            wake: Notify::new(),
            planned_poll: AtomicI64::new(SCANNING),
        }
    }

    /// Tell the poller a timeout was stored
    ///
    /// Wakes the poller early when the timeout is due before the planned
    /// scan. A notification during a scan triggers one more scan.
    pub fn notify_new_timeout(&self, due: DateTime<Utc>) {
        if due.timestamp_millis() < self.planned_poll.load(Ordering::Acquire) {
            self.wake.notify_one();
        }
    }

    /// Stop `run` and any scan in flight
    pub fn shutdown(&self) {
        self.scanner.shutdown();
    }

    /// Dispatch the chunk in order
    ///
    /// Returns the first entry that failed; later entries are not attempted.
    async fn dispatch_chunk(
        &self,
        chunk: &TimeoutsChunk,
    ) -> std::result::Result<(), TimeoutEntry> {
        for timeout in &chunk.due_timeouts {
            if self.scanner.is_shut_down() {
                break;
            }
            if let Err(err) = self.dispatcher.dispatch(timeout).await {
                warn!(
                    endpoint = %self.scanner.endpoint(),
                    timeout_id = %timeout.id,
                    error = %err,
                    "Failed to dispatch timeout"
                );
                return Err(timeout.clone());
            }
        }
        Ok(())
    }

    /// Sleep for `wait`, returns early on wake-up or shutdown
    async fn pause(&self, wait: Duration, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.wake.notified() => {
                debug!(endpoint = %self.scanner.endpoint(), "Woken up by a new timeout");
            }
            _ = shutdown.changed() => {}
        }
    }

    /// Poll until `shutdown`
    ///
    /// Scan and store failures are logged and retried after the dispatch
    /// retry delay.
    pub async fn run(&self, start_slice: DateTime<Utc>) {
        let endpoint = self.scanner.endpoint().clone();
        let clock = self.scanner.clock();
        let mut shutdown = self.scanner.subscribe_shutdown();
        let mut start_slice = start_slice;
        let mut immediate_polls: u32 = 0;

        info!(endpoint = %endpoint, start_slice = %start_slice, "Timeout poller started");

        while !self.scanner.is_shut_down() {
            self.planned_poll.store(SCANNING, Ordering::Release);

            let chunk = match self.scanner.get_next_chunk(start_slice).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "Timeout scan failed");
                    self.pause(self.settings.dispatch_retry_delay, &mut shutdown).await;
                    continue;
                }
            };

            if let Err(failed) = self.dispatch_chunk(&chunk).await {
                start_slice = start_slice.min(failed.time);
                self.pause(self.settings.dispatch_retry_delay, &mut shutdown).await;
                continue;
            }
            if self.scanner.is_shut_down() {
                break;
            }
            if let Some(latest) = chunk.latest_due_time() {
                start_slice = start_slice.max(latest);
            }

            let now = clock.now();
            if chunk.next_poll_time <= now {
                immediate_polls += 1;
                if immediate_polls > 1 {
                    warn!(
                        endpoint = %endpoint,
                        count = immediate_polls,
                        "Timeout index still stale, polling at the minimum interval"
                    );
                }
            } else {
                immediate_polls = 0;
            }

            self.planned_poll
                .store(chunk.next_poll_time.timestamp_millis(), Ordering::Release);
            let wait = (chunk.next_poll_time - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(self.settings.min_poll_interval);

            debug!(
                endpoint = %endpoint,
                count = chunk.due_timeouts.len(),
                next_poll = %chunk.next_poll_time,
                "Timeout poll complete"
            );
            self.pause(wait, &mut shutdown).await;
        }

        info!(endpoint = %endpoint, "Timeout poller stopped");
    }
}
