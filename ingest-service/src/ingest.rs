use crate::clock::Clock;
use crate::shutdown::ShutdownSignal;
use futures::StreamExt;
use record_store::{DailyRotation, RecordOutcome, RecordStore};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracker_core::{
    backoff_for, CommentEvent, CoreError, ErrorExt, EventSource, EventStream, FaultDisposition,
    Severity, StreamError, TriggerSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    FaultedBackoff { delay: Duration },
    Stopped,
}

/// Counters for one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub events_seen: u64,
    pub matched: u64,
    /// Matches that changed the store and were flushed
    pub stored: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub faults: u64,
    pub rotations: u64,
}

/// Drives one event source into the dated record store.
///
/// Faults are routed through [`FaultDisposition`]: malformed events are
/// skipped, everything transient backs off and reconnects, and only config
/// or store corruption ends the run with an error.
pub struct IngestLoop<S, C> {
    source: S,
    clock: C,
    triggers: TriggerSet,
    rotation: DailyRotation,
    backoff: Duration,
    shutdown: ShutdownSignal,
    state: LoopState,
    stats: IngestStats,
}

impl<S: EventSource, C: Clock> IngestLoop<S, C> {
    pub fn new(
        source: S,
        clock: C,
        triggers: TriggerSet,
        data_dir: impl Into<PathBuf>,
        backoff: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        let rotation = DailyRotation::new(data_dir, clock.today());
        Self {
            source,
            clock,
            triggers,
            rotation,
            backoff,
            shutdown,
            state: LoopState::Running,
            stats: IngestStats::default(),
        }
    }

    /// Runs until shutdown is requested or a fatal fault occurs.
    ///
    /// The store is flushed and the error log closed on both paths.
    pub async fn run(mut self) -> Result<IngestStats, CoreError> {
        let mut store = match self.rotation.open_store() {
            Ok(store) => store,
            Err(e) => {
                self.rotation.error_log().record(&e);
                self.rotation.error_log().close();
                return Err(e);
            }
        };
        info!(
            "Tracking {} trigger phrases from {} into {}",
            self.triggers.len(),
            self.source.describe(),
            store.path().display()
        );

        let result = self.drive(&mut store).await;

        if let Err(e) = store.flush() {
            e.log_error();
            self.rotation.error_log().record(&e);
        }
        self.rotation.error_log().close();

        match result {
            Ok(()) => {
                info!("Stopped after {} events, {} stored", self.stats.events_seen, self.stats.stored);
                Ok(self.stats)
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(&mut self, store: &mut RecordStore) -> Result<(), CoreError> {
        loop {
            match self.state {
                LoopState::Running => {
                    let pass = match self.rotate(store) {
                        Ok(()) => self.run_connection(store).await,
                        Err(e) => Err(e),
                    };
                    match pass {
                        Ok(()) => self.state = LoopState::Stopped,
                        Err(e) => self.on_fault(store, e)?,
                    }
                }
                LoopState::FaultedBackoff { delay } => {
                    tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => self.state = LoopState::Stopped,
                        _ = sleep(delay) => self.state = LoopState::Running,
                    }
                }
                LoopState::Stopped => return Ok(()),
            }
        }
    }

    /// Consumes one connection. `Ok` means shutdown was requested.
    async fn run_connection(&mut self, store: &mut RecordStore) -> Result<(), CoreError> {
        if self.shutdown.is_triggered() {
            return Ok(());
        }

        let mut stream: EventStream = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return Ok(()),
            connected = self.source.connect() => connected?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => return Ok(()),
                next = stream.next() => next,
            };

            let result = match next {
                None => Err(StreamError::Disconnected.into()),
                Some(Ok(event)) => self.process_event(store, &event),
                Some(Err(e)) => Err(e),
            };

            if let Err(e) = result {
                match FaultDisposition::classify(&e) {
                    FaultDisposition::SkipEvent => {
                        self.stats.skipped += 1;
                        self.rotation.error_log().record(&e);
                        debug!("Skipped event: {}", e);
                    }
                    _ => return Err(e),
                }
            }
        }
    }

    fn process_event(&mut self, store: &mut RecordStore, event: &CommentEvent) -> Result<(), CoreError> {
        self.stats.events_seen += 1;
        self.rotate(store)?;

        let candidate = event.to_candidate()?;
        if !self.triggers.matches(&candidate.body) {
            return Ok(());
        }
        self.stats.matched += 1;

        let outcome = store.record_comment(
            &candidate.author_id,
            &candidate.author_name,
            Some(&candidate.subreddit),
            &candidate.body,
        );

        match outcome {
            RecordOutcome::Duplicate { id } => {
                self.stats.duplicates += 1;
                debug!("Duplicate comment from record {}", id);
            }
            RecordOutcome::NewAuthor { id } | RecordOutcome::Appended { id } => {
                store.flush()?;
                self.stats.stored += 1;
                info!(
                    "[{}] {} in r/{}: {}",
                    id, candidate.author_name, candidate.subreddit, candidate.body
                );
            }
        }
        Ok(())
    }

    fn rotate(&mut self, store: &mut RecordStore) -> Result<(), CoreError> {
        if self.rotation.rotate_if_needed(self.clock.today(), store)? {
            self.stats.rotations += 1;
        }
        Ok(())
    }

    /// Logs a pass-ending fault and moves to backoff, or returns it when fatal.
    fn on_fault(&mut self, store: &mut RecordStore, error: CoreError) -> Result<(), CoreError> {
        // The fault belongs in the log of the day it happened on.
        let rotation = self.rotate(store);
        self.record_fault(&error);
        if FaultDisposition::classify(&error).is_fatal() {
            return Err(error);
        }

        if let Err(rotation_error) = rotation {
            if FaultDisposition::classify(&rotation_error).is_fatal() {
                self.record_fault(&rotation_error);
                return Err(rotation_error);
            }
            debug!("Rotation still pending: {}", rotation_error);
        }

        let delay = backoff_for(&error, self.backoff);
        debug!("Backing off for {:?}", delay);
        self.state = LoopState::FaultedBackoff { delay };
        Ok(())
    }

    fn record_fault(&mut self, error: &CoreError) {
        self.stats.faults += 1;
        if error.severity() == Severity::Critical {
            warn!("{}", error.user_friendly_message());
        } else {
            debug!("Fault from {}: {}", self.source.describe(), error);
        }
        self.rotation.error_log().record(error);
    }
}
