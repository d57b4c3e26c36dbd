//! Clock - Where "now" comes from

use chrono::{DateTime, Utc};

/// Source of the current instant
///
/// The scanner compares due times against this; tests drive it manually.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
