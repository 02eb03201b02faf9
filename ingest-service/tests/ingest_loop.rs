use chrono::{NaiveDate, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use ingest_service::{shutdown_channel, Clock, IngestLoop, IngestStats, ShutdownHandle};
use record_store::Record;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracker_core::{
    CommentEvent, CoreError, EventSource, EventStream, RedditApiError, StoreError,
    TriggerSet,
};

const BACKOFF: Duration = Duration::from_millis(10);

enum Script {
    Events(Vec<Result<CommentEvent, CoreError>>),
    /// A prebuilt stream, for events with side effects
    Stream(EventStream),
    Refuse(CoreError),
}

/// Replays one script per connection and requests shutdown once the last
/// one is drained.
struct ScriptedSource {
    scripts: VecDeque<Script>,
    shutdown: Arc<ShutdownHandle>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(scripts: Vec<Script>, shutdown: Arc<ShutdownHandle>) -> Self {
        Self {
            scripts: scripts.into(),
            shutdown,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl EventSource for ScriptedSource {
    fn connect(&mut self) -> BoxFuture<'_, Result<EventStream, CoreError>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.pop_front();
        let last = self.scripts.is_empty();
        let shutdown = self.shutdown.clone();

        async move {
            let replay = match script {
                None => {
                    shutdown.trigger();
                    return Ok(stream::pending::<Result<CommentEvent, CoreError>>().boxed());
                }
                Some(Script::Refuse(e)) => return Err(e),
                Some(Script::Events(events)) => stream::iter(events).boxed(),
                Some(Script::Stream(events)) => events,
            };

            if !last {
                return Ok(replay.boxed());
            }
            let stop = stream::once(async move { shutdown.trigger() })
                .filter_map(|()| async { None::<Result<CommentEvent, CoreError>> })
                .chain(stream::pending());
            Ok(replay.chain(stop).boxed())
        }
        .boxed()
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Returns `before` for the first `switch_after` calls, `after` from then on.
struct RolloverClock {
    calls: AtomicUsize,
    switch_after: usize,
    before: NaiveDate,
    after: NaiveDate,
}

impl Clock for RolloverClock {
    fn today(&self) -> NaiveDate {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.switch_after {
            self.before
        } else {
            self.after
        }
    }
}

fn fixed_clock(date: NaiveDate) -> RolloverClock {
    RolloverClock {
        calls: AtomicUsize::new(0),
        switch_after: usize::MAX,
        before: date,
        after: date,
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

fn comment(id: &str, author: Option<&str>, body: &str) -> Result<CommentEvent, CoreError> {
    Ok(CommentEvent {
        id: id.to_string(),
        author_id: author.map(str::to_string),
        author_name: author.map(|a| format!("name_{a}")),
        body: body.to_string(),
        subreddit: "rust".to_string(),
        timestamp: Utc::now(),
    })
}

fn triggers() -> TriggerSet {
    TriggerSet::from_phrases(["help", "bug"])
}

fn read_records(path: &Path) -> Vec<Record> {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

async fn run_scripts(
    dir: &Path,
    clock: RolloverClock,
    scripts: Vec<Script>,
) -> Result<IngestStats, CoreError> {
    let (handle, signal) = shutdown_channel();
    let source = ScriptedSource::new(scripts, Arc::new(handle));
    let ingest = IngestLoop::new(source, clock, triggers(), dir, BACKOFF, signal);
    timeout(Duration::from_secs(10), ingest.run())
        .await
        .expect("ingest loop did not stop")
}

#[tokio::test]
async fn test_help_and_bug_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = vec![Script::Events(vec![
        comment("c1", Some("u1"), "I need HELP please"),
        comment("c2", Some("u2"), "found a bug"),
        comment("c3", Some("u3"), "nothing to see here"),
    ])];

    let stats = run_scripts(dir.path(), fixed_clock(day(1)), scripts).await.unwrap();

    let records = read_records(&dir.path().join("outJsonFile20240501.json"));
    assert_eq!(records.len(), 3);
    assert_eq!(records[0], Record::seed());
    assert_eq!(records[1].author_id, "u1");
    assert_eq!(records[1].author_name, "name_u1");
    assert_eq!(records[1].subreddit.as_deref(), Some("rust"));
    assert_eq!(records[1].comments_list, vec!["i need help please"]);
    assert_eq!(records[2].id, 3);
    assert_eq!(records[2].comments_list, vec!["found a bug"]);

    assert_eq!(stats.events_seen, 3);
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.stored, 2);
    assert_eq!(stats.faults, 0);

    // A quiet day leaves no error log.
    assert!(!dir.path().join("log20240501.txt").exists());
}

#[tokio::test]
async fn test_stream_fault_backs_off_and_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = vec![
        Script::Events(vec![
            comment("c1", Some("u1"), "help me"),
            Err(RedditApiError::RequestTimeout.into()),
            comment("lost", Some("u9"), "help never delivered"),
        ]),
        Script::Refuse(RedditApiError::ServerError { status_code: 503 }.into()),
        Script::Events(vec![comment("c2", Some("u2"), "another bug")]),
    ];

    let stats = run_scripts(dir.path(), fixed_clock(day(1)), scripts).await.unwrap();

    let records = read_records(&dir.path().join("outJsonFile20240501.json"));
    let authors: Vec<_> = records.iter().map(|r| r.author_id.as_str()).collect();
    assert_eq!(authors, vec!["JohnDoe", "u1", "u2"]);
    assert_eq!(stats.faults, 2);

    let log = fs::read_to_string(dir.path().join("log20240501.txt")).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("ERROR [REDDIT_TIMEOUT]"));
    assert!(lines[0].contains("Request timeout"));
    assert!(lines[1].contains("[REDDIT_SERVER_ERROR]"));
}

#[tokio::test]
async fn test_provider_closing_stream_is_a_fault() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = vec![
        Script::Events(vec![comment("c1", Some("u1"), "help")]),
        Script::Events(vec![comment("c2", Some("u1"), "bug")]),
    ];

    let stats = run_scripts(dir.path(), fixed_clock(day(1)), scripts).await.unwrap();

    assert_eq!(stats.faults, 1);
    let log = fs::read_to_string(dir.path().join("log20240501.txt")).unwrap();
    assert!(log.contains("Stream ended by provider"));

    let records = read_records(&dir.path().join("outJsonFile20240501.json"));
    assert_eq!(records[1].comments_list, vec!["help", "bug"]);
}

#[tokio::test]
async fn test_event_without_author_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = vec![Script::Events(vec![
        comment("c1", None, "help from a deleted account"),
        comment("c2", Some("u2"), "bug report"),
    ])];

    let stats = run_scripts(dir.path(), fixed_clock(day(1)), scripts).await.unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.faults, 0);
    assert_eq!(stats.stored, 1);

    let log = fs::read_to_string(dir.path().join("log20240501.txt")).unwrap();
    assert!(log.contains("WARNING [EVENT_SHAPE]"));
    assert!(log.contains("c1"));
}

#[tokio::test]
async fn test_duplicate_comment_is_not_stored_twice() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = vec![Script::Events(vec![
        comment("c1", Some("u1"), "Help please"),
        comment("c2", Some("u1"), "help please"),
    ])];

    let stats = run_scripts(dir.path(), fixed_clock(day(1)), scripts).await.unwrap();

    assert_eq!(stats.matched, 2);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.duplicates, 1);

    let records = read_records(&dir.path().join("outJsonFile20240501.json"));
    assert_eq!(records[1].comments_list, vec!["help please"]);
}

#[tokio::test]
async fn test_day_change_rotates_store_and_log() {
    let dir = tempfile::tempdir().unwrap();
    // One call at construction, one per pass, then one per event: the third
    // event lands on day 2.
    let clock = RolloverClock {
        calls: AtomicUsize::new(0),
        switch_after: 4,
        before: day(1),
        after: day(2),
    };
    let scripts = vec![Script::Events(vec![
        comment("c1", Some("u1"), "help"),
        comment("c2", None, "bug without author"),
        comment("c3", Some("u3"), "bug after midnight"),
        comment("c4", None, "help without author"),
    ])];

    let stats = run_scripts(dir.path(), clock, scripts).await.unwrap();
    assert_eq!(stats.rotations, 1);

    let first = read_records(&dir.path().join("outJsonFile20240501.json"));
    let authors: Vec<_> = first.iter().map(|r| r.author_id.as_str()).collect();
    assert_eq!(authors, vec!["JohnDoe", "u1"]);

    let second = read_records(&dir.path().join("outJsonFile20240502.json"));
    assert_eq!(second[0], Record::seed());
    assert_eq!(second[1].id, 2);
    assert_eq!(second[1].author_id, "u3");

    let first_log = fs::read_to_string(dir.path().join("log20240501.txt")).unwrap();
    let second_log = fs::read_to_string(dir.path().join("log20240502.txt")).unwrap();
    assert!(first_log.contains("c2"));
    assert!(second_log.contains("c4"));
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, signal) = shutdown_channel();
    let handle = Arc::new(handle);
    let source = ScriptedSource::new(
        vec![
            Script::Events(vec![comment("c1", Some("u1"), "help")]),
            Script::Events(vec![]),
        ],
        handle.clone(),
    );
    let connects = source.connects.clone();
    let ingest = IngestLoop::new(
        source,
        fixed_clock(day(1)),
        triggers(),
        dir.path(),
        Duration::from_secs(3600),
        signal,
    );

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.trigger();
    });

    let stats = timeout(Duration::from_secs(5), ingest.run())
        .await
        .expect("backoff was not interrupted")
        .unwrap();
    trigger.await.unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.faults, 1);
}

#[tokio::test]
async fn test_shutdown_before_start_still_seeds_store() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, signal) = shutdown_channel();
    handle.trigger();
    let source = ScriptedSource::new(vec![], Arc::new(handle));
    let connects = source.connects.clone();

    let stats = IngestLoop::new(source, fixed_clock(day(1)), triggers(), dir.path(), BACKOFF, signal)
        .run()
        .await
        .unwrap();

    assert_eq!(stats, IngestStats::default());
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(
        read_records(&dir.path().join("outJsonFile20240501.json")),
        vec![Record::seed()]
    );
}

#[tokio::test]
async fn test_corrupt_store_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("outJsonFile20240501.json"), "{ not json").unwrap();

    let err = run_scripts(dir.path(), fixed_clock(day(1)), vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Store(StoreError::Corrupt { .. })));
    assert_eq!(
        fs::read_to_string(dir.path().join("outJsonFile20240501.json")).unwrap(),
        "{ not json"
    );
    let log = fs::read_to_string(dir.path().join("log20240501.txt")).unwrap();
    assert!(log.contains("CRITICAL [STORE_CORRUPT]"));
}

#[tokio::test]
async fn test_corrupt_next_day_store_stops_after_flushing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("outJsonFile20240502.json"), "garbage").unwrap();
    let clock = RolloverClock {
        calls: AtomicUsize::new(0),
        switch_after: 3,
        before: day(1),
        after: day(2),
    };
    let scripts = vec![Script::Events(vec![
        comment("c1", Some("u1"), "help"),
        comment("c2", Some("u2"), "bug"),
    ])];

    let err = run_scripts(dir.path(), clock, scripts).await.unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::Corrupt { .. })));

    let first = read_records(&dir.path().join("outJsonFile20240501.json"));
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].author_id, "u1");
}

#[tokio::test]
async fn test_fault_after_midnight_lands_in_current_log() {
    let dir = tempfile::tempdir().unwrap();
    // Day 2 already holds when the first pass starts.
    let clock = RolloverClock {
        calls: AtomicUsize::new(0),
        switch_after: 1,
        before: day(1),
        after: day(2),
    };
    let scripts = vec![
        Script::Refuse(RedditApiError::ServerError { status_code: 503 }.into()),
        Script::Events(vec![comment("c1", Some("u1"), "help")]),
    ];

    let stats = run_scripts(dir.path(), clock, scripts).await.unwrap();
    assert_eq!(stats.rotations, 1);
    assert_eq!(stats.faults, 1);

    assert!(!dir.path().join("log20240501.txt").exists());
    let log = fs::read_to_string(dir.path().join("log20240502.txt")).unwrap();
    assert!(log.contains("[REDDIT_SERVER_ERROR]"));

    assert_eq!(
        read_records(&dir.path().join("outJsonFile20240501.json")),
        vec![Record::seed()]
    );
    let second = read_records(&dir.path().join("outJsonFile20240502.json"));
    assert_eq!(second[1].author_id, "u1");
}

#[tokio::test]
async fn test_stream_closing_after_midnight_logs_to_new_day() {
    let dir = tempfile::tempdir().unwrap();
    // Construction, first pass and c1 see day 1; the disconnect sees day 2.
    let clock = RolloverClock {
        calls: AtomicUsize::new(0),
        switch_after: 3,
        before: day(1),
        after: day(2),
    };
    let scripts = vec![
        Script::Events(vec![comment("c1", Some("u1"), "help")]),
        Script::Events(vec![]),
    ];

    let stats = run_scripts(dir.path(), clock, scripts).await.unwrap();
    assert_eq!(stats.rotations, 1);

    let first = read_records(&dir.path().join("outJsonFile20240501.json"));
    assert_eq!(first[1].author_id, "u1");
    assert!(!dir.path().join("log20240501.txt").exists());
    let log = fs::read_to_string(dir.path().join("log20240502.txt")).unwrap();
    assert!(log.contains("Stream ended by provider"));
}

#[tokio::test]
async fn test_failed_flush_backs_off_and_keeps_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("outJsonFile20240501.json");

    // A directory in place of the store file makes the next flush fail.
    let blocked = store_path.clone();
    let first = stream::once(async move {
        fs::remove_file(&blocked).unwrap();
        fs::create_dir(&blocked).unwrap();
        comment("c1", Some("u1"), "help")
    })
    .boxed();
    let unblocked = store_path.clone();
    let second = stream::once(async move {
        fs::remove_dir(&unblocked).unwrap();
        comment("c2", Some("u2"), "bug")
    })
    .boxed();

    let scripts = vec![Script::Stream(first), Script::Stream(second)];
    let stats = run_scripts(dir.path(), fixed_clock(day(1)), scripts).await.unwrap();

    assert_eq!(stats.matched, 2);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.faults, 1);

    let log = fs::read_to_string(dir.path().join("log20240501.txt")).unwrap();
    assert!(log.contains("ERROR [STORE_FLUSH_FAILED]"));

    let records = read_records(&store_path);
    let authors: Vec<_> = records.iter().map(|r| r.author_id.as_str()).collect();
    assert_eq!(authors, vec!["JohnDoe", "u1", "u2"]);
}
