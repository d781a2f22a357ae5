//! Turns repeated listing fetches into an endless stream of new items.

use crate::error::CoreError;
use crate::platform::Platform;
use crate::types::{Item, ItemKind};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace};

const MAX_LISTING_LIMIT: u32 = 100;
const LIMIT_CYCLE: u32 = 30;
const SEEN_CAPACITY: usize = 301;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Mark whatever the first poll returns as seen without yielding it.
    pub skip_existing: bool,
    /// Longest pause between polls that found nothing new.
    pub max_pause: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            skip_existing: false,
            max_pause: Duration::from_secs(16),
        }
    }
}

/// Remembers the most recent fullnames, forgetting the oldest first.
#[derive(Debug)]
pub struct BoundedSet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl BoundedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    /// Returns false if `key` was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.members.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.order.push_back(key.to_string());
        self.members.insert(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Doubling pause with ±50% jitter, reset whenever something new shows up.
#[derive(Debug)]
pub struct PollBackoff {
    base: f64,
    max: f64,
}

impl PollBackoff {
    pub fn new(max: Duration) -> Self {
        Self {
            base: 1.0,
            max: max.as_secs_f64().max(1.0),
        }
    }

    pub fn next_pause(&mut self) -> Duration {
        let jitter = fastrand::f64() * self.base - self.base / 2.0;
        let pause = self.base + jitter;
        self.base = (self.base * 2.0).min(self.max);
        Duration::from_secs_f64(pause.max(0.0))
    }

    pub fn reset(&mut self) {
        self.base = 1.0;
    }
}

pub struct ItemStream<P: Platform> {
    platform: Arc<P>,
    subreddit: String,
    kind: ItemKind,
    skip_existing: bool,
    seen: BoundedSet,
    pending: VecDeque<Item>,
    backoff: PollBackoff,
    limit_offset: u32,
}

impl<P: Platform> ItemStream<P> {
    pub fn new(platform: Arc<P>, subreddit: &str, kind: ItemKind, options: StreamOptions) -> Self {
        Self {
            platform,
            subreddit: subreddit.to_string(),
            kind,
            skip_existing: options.skip_existing,
            seen: BoundedSet::new(SEEN_CAPACITY),
            pending: VecDeque::new(),
            backoff: PollBackoff::new(options.max_pause),
            limit_offset: 0,
        }
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Wait for the next unseen item. Errors from the platform are returned
    /// as they are; the stream can be polled again afterwards.
    pub async fn next_item(&mut self) -> Result<Item, CoreError> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(item);
            }

            let found = self.poll_once().await?;
            if found {
                self.backoff.reset();
            } else {
                let pause = self.backoff.next_pause();
                trace!(
                    "Nothing new in r/{} {}, sleeping {:?}",
                    self.subreddit,
                    self.kind.plural(),
                    pause
                );
                sleep(pause).await;
            }
        }
    }

    /// Fetch one listing and queue its unseen items oldest first.
    async fn poll_once(&mut self) -> Result<bool, CoreError> {
        // Varying the limit keeps Reddit from serving a cached listing.
        let limit = MAX_LISTING_LIMIT - self.limit_offset;
        self.limit_offset = (self.limit_offset + 1) % LIMIT_CYCLE;

        let batch = self
            .platform
            .fetch_new(&self.subreddit, self.kind, limit)
            .await?;

        let mut found = false;
        for item in batch.into_iter().rev() {
            if !self.seen.insert(item.fullname()) {
                continue;
            }
            found = true;
            if !self.skip_existing {
                self.pending.push_back(item);
            }
        }

        if self.skip_existing {
            debug!(
                "Skipped {} existing {} in r/{}",
                self.seen.len(),
                self.kind.plural(),
                self.subreddit
            );
            self.skip_existing = false;
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Comment, Identity, PostedReply, ReplyTree, Submission};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedListings {
        batches: Mutex<VecDeque<Vec<Item>>>,
        limits: Mutex<Vec<u32>>,
    }

    fn submission(id: &str) -> Item {
        Item::Submission(Submission {
            id: id.to_string(),
            fullname: format!("t3_{id}"),
            title: format!("post {id}"),
            selftext: String::new(),
            author: Some("someone".to_string()),
            subreddit: "test".to_string(),
            permalink: format!("/r/test/comments/{id}/"),
        })
    }

    #[async_trait]
    impl Platform for ScriptedListings {
        async fn authenticate(&self) -> Result<Identity, CoreError> {
            Ok(Identity::new("bot"))
        }

        async fn current_identity(&self) -> Result<Identity, CoreError> {
            Ok(Identity::new("bot"))
        }

        async fn fetch_new(
            &self,
            _subreddit: &str,
            _kind: ItemKind,
            limit: u32,
        ) -> Result<Vec<Item>, CoreError> {
            self.limits.lock().unwrap().push(limit);
            Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn expand_replies(&self, _item: &Item) -> Result<ReplyTree, CoreError> {
            Ok(ReplyTree::default())
        }

        async fn post_reply(&self, _item: &Item, _text: &str) -> Result<PostedReply, CoreError> {
            unreachable!()
        }

        async fn parent_of(&self, _comment: &Comment) -> Result<Item, CoreError> {
            unreachable!()
        }
    }

    fn scripted(batches: Vec<Vec<Item>>) -> Arc<ScriptedListings> {
        Arc::new(ScriptedListings {
            batches: Mutex::new(batches.into()),
            limits: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_bounded_set_evicts_oldest() {
        let mut set = BoundedSet::new(2);
        assert!(set.insert("a"));
        assert!(set.insert("b"));
        assert!(!set.insert("a"));
        assert!(set.insert("c"));
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_poll_backoff_grows_and_resets() {
        let mut backoff = PollBackoff::new(Duration::from_secs(16));
        let pauses: Vec<Duration> = (0..8).map(|_| backoff.next_pause()).collect();
        assert!(pauses[0] <= Duration::from_secs_f64(1.5));
        assert!(pauses.iter().all(|p| *p <= Duration::from_secs(24)));
        assert!(pauses[7] >= Duration::from_secs(8));

        backoff.reset();
        assert!(backoff.next_pause() <= Duration::from_secs_f64(1.5));
    }

    #[tokio::test]
    async fn test_yields_oldest_first_without_replays() {
        // Listings arrive newest first and overlap between polls.
        let platform = scripted(vec![
            vec![submission("c"), submission("b"), submission("a")],
            vec![submission("d"), submission("c"), submission("b")],
        ]);
        let mut stream = platform
            .clone()
            .stream_new_submissions("test", StreamOptions::default());

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(stream.next_item().await.unwrap().fullname().to_string());
        }
        assert_eq!(ids, vec!["t3_a", "t3_b", "t3_c", "t3_d"]);

        let limits = platform.limits.lock().unwrap().clone();
        assert_eq!(limits, vec![100, 99]);
    }

    #[tokio::test]
    async fn test_skip_existing_marks_backlog_seen() {
        let platform = scripted(vec![
            vec![submission("b"), submission("a")],
            vec![submission("c"), submission("b")],
        ]);
        let options = StreamOptions {
            skip_existing: true,
            ..Default::default()
        };
        let mut stream = ItemStream::new(platform, "test", ItemKind::Submission, options);

        let item = stream.next_item().await.unwrap();
        assert_eq!(item.fullname(), "t3_c");
    }
}
