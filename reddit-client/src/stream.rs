use crate::api::LISTING_LIMIT;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::RedditClient;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use tracker_core::{CommentEvent, CoreError, EventSource, EventStream};

/// How many comment ids are remembered to drop repeats between polls.
const SEEN_CAPACITY: usize = 1000;

/// Insertion-ordered set that forgets its oldest ids past `capacity`.
#[derive(Debug)]
pub struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` if `id` was not seen before.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Keeps the unseen comments of a newest-first listing, oldest first.
pub fn fresh_comments(seen: &mut SeenIds, listing: Vec<CommentEvent>) -> Vec<CommentEvent> {
    listing
        .into_iter()
        .rev()
        .filter(|comment| seen.insert(&comment.id))
        .collect()
}

/// Live comments of one subreddit, built on listing polls.
///
/// The first connection drops whatever is already in the listing so only
/// comments posted after startup are reported. Reconnects resume from the
/// current listing window.
pub struct RedditCommentSource {
    client: Arc<RedditClient>,
    subreddit: String,
    poll_interval: Duration,
    retry: RetryExecutor,
    primed: bool,
}

impl RedditCommentSource {
    pub fn new(client: Arc<RedditClient>, subreddit: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client,
            subreddit: subreddit.into(),
            poll_interval,
            retry: RetryExecutor::new(RetryConfig::reddit()),
            primed: false,
        }
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }
}

impl EventSource for RedditCommentSource {
    fn connect(&mut self) -> BoxFuture<'_, Result<EventStream, CoreError>> {
        async move {
            // Fail the connect, not the first poll, when credentials are rejected.
            self.client.access_token().await?;

            let skip_existing = !self.primed;
            self.primed = true;
            info!("Listening to r/{}", self.subreddit);

            let poller = Poller {
                client: self.client.clone(),
                subreddit: self.subreddit.clone(),
                poll_interval: self.poll_interval,
                retry: self.retry.clone(),
                seen: SeenIds::new(SEEN_CAPACITY),
                pending: VecDeque::new(),
                skip_existing,
                polls: 0,
            };
            Ok(poller.into_stream())
        }
        .boxed()
    }

    fn describe(&self) -> String {
        format!("r/{}", self.subreddit)
    }
}

struct Poller {
    client: Arc<RedditClient>,
    subreddit: String,
    poll_interval: Duration,
    retry: RetryExecutor,
    seen: SeenIds,
    pending: VecDeque<CommentEvent>,
    skip_existing: bool,
    polls: u64,
}

impl Poller {
    fn into_stream(self) -> EventStream {
        stream::unfold(self, |mut poller| async move {
            loop {
                if let Some(event) = poller.pending.pop_front() {
                    return Some((Ok(event), poller));
                }
                if poller.polls > 0 {
                    sleep(poller.poll_interval).await;
                }
                if let Err(e) = poller.poll().await {
                    return Some((Err(e), poller));
                }
            }
        })
        .boxed()
    }

    async fn poll(&mut self) -> Result<(), CoreError> {
        let client = self.client.clone();
        let subreddit = self.subreddit.clone();
        let listing = self
            .retry
            .execute("fetch_new_comments", move || {
                let client = client.clone();
                let subreddit = subreddit.clone();
                async move { client.fetch_new_comments(&subreddit, LISTING_LIMIT).await }
            })
            .await;
        self.polls += 1;

        let fresh = fresh_comments(&mut self.seen, listing?);
        if self.skip_existing && self.polls == 1 {
            debug!("Skipping {} existing comments in r/{}", fresh.len(), self.subreddit);
        } else {
            self.pending.extend(fresh);
        }
        Ok(())
    }
}
