//! Fault routing for the ingest loop.
//!
//! Every error raised while consuming the stream is mapped to one of three
//! dispositions: drop the offending event, back off and reconnect, or stop
//! the process.

use crate::{CoreError, ErrorExt, RedditApiError, StoreError};
use std::time::Duration;

const MAX_PROVIDER_BACKOFF: Duration = Duration::from_secs(600);

/// What the ingest loop does with a caught fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Log the fault and continue with the next event on the same connection
    SkipEvent,
    /// Log the fault, sleep the backoff interval, then reconnect
    Backoff,
    /// Escalate: the process cannot continue without operator action
    Fatal,
}

impl FaultDisposition {
    /// Classify an error raised inside a running pass
    pub fn classify(error: &CoreError) -> Self {
        match error {
            // One bad comment never interrupts the stream
            CoreError::EventShape(_) => FaultDisposition::SkipEvent,

            // Needs a fixed config file
            CoreError::Config(_) => FaultDisposition::Fatal,

            // Never fabricate data over an unreadable store
            CoreError::Store(StoreError::Corrupt { .. }) => FaultDisposition::Fatal,
            CoreError::Store(StoreError::ReadFailed { .. }) => FaultDisposition::Fatal,

            // Stream, network, provider, and write failures are transient
            _ => FaultDisposition::Backoff,
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, FaultDisposition::Fatal)
    }
}

/// Backoff interval to use after `error`, never shorter than `base` and
/// stretched when the provider asked for a longer wait.
pub fn backoff_for(error: &CoreError, base: Duration) -> Duration {
    match error {
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { .. }) => error
            .retry_after()
            .map(|requested| requested.min(MAX_PROVIDER_BACKOFF).max(base))
            .unwrap_or(base),
        _ => base,
    }
}
