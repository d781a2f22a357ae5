//! One account watching one kind of item in one subreddit.
//!
//! Every observed item runs through a short-circuit gate chain and ends up
//! with exactly one [`Classification`], which is logged as a single
//! structured event before anything is posted.

use crate::health::{HealthRegistry, WorkerId, WorkerState};
use autoreply_core::dedup::check_already_replied;
use autoreply_core::selector::{select_response_with, should_reply_with};
use autoreply_core::stream::BoundedSet;
use autoreply_core::trigger::TriggerMatcher;
use autoreply_core::{
    BotConfig, Comment, CoreError, ErrorExt, GateOrder, Identity, Item, ItemKind, Platform,
    PostedReply, StreamOptions,
};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// How many of the account's own replies are remembered for spotting
/// answers to them without a parent lookup.
const RECENT_REPLY_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Connecting,
    Streaming,
    Evaluating,
    Replying,
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    NonTriggering,
    OwnItem,
    AlreadyReplied,
    /// The reply tree could not be loaded, so whether we already answered
    /// is unknown.
    DuplicateCheckFailed { reason: String },
    RandomlySkipped,
    Reply {
        response: String,
        /// The item answers one of ours, so sampling was bypassed.
        addressed_to_me: bool,
    },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::NonTriggering => "non_triggering",
            Classification::OwnItem => "own_item",
            Classification::AlreadyReplied => "already_replied",
            Classification::DuplicateCheckFailed { .. } => "duplicate_check_failed",
            Classification::RandomlySkipped => "randomly_skipped",
            Classification::Reply { .. } => "reply",
        }
    }

    pub fn describe(&self, kind: ItemKind) -> String {
        match self {
            Classification::NonTriggering => format!("Non-triggering {}", kind),
            Classification::OwnItem => format!("My own {}", kind),
            Classification::AlreadyReplied => format!("Already replied to {}", kind),
            Classification::DuplicateCheckFailed { reason } => {
                format!("Could not check replies to {}: {}", kind, reason)
            }
            Classification::RandomlySkipped => format!("Randomly skipping this {}", kind),
            Classification::Reply { .. } => format!("Replying to {}", kind),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Posted(PostedReply),
    DryRun,
    Rejected { reason: String },
}

impl ReplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReplyOutcome::Posted(_) => "posted",
            ReplyOutcome::DryRun => "dry_run",
            ReplyOutcome::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub fullname: String,
    pub classification: Classification,
    pub outcome: Option<ReplyOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub observed: u64,
    pub posted: u64,
    pub dry_run: u64,
    pub rejected: u64,
    pub skipped: u64,
}

impl DispatcherStats {
    fn record(&mut self, outcome: Option<&ReplyOutcome>) {
        self.observed += 1;
        match outcome {
            Some(ReplyOutcome::Posted(_)) => self.posted += 1,
            Some(ReplyOutcome::DryRun) => self.dry_run += 1,
            Some(ReplyOutcome::Rejected { .. }) => self.rejected += 1,
            None => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &DispatcherStats) {
        self.observed += other.observed;
        self.posted += other.posted;
        self.dry_run += other.dry_run;
        self.rejected += other.rejected;
        self.skipped += other.skipped;
    }
}

/// Everything the workers of one account share.
pub struct AccountContext<P: Platform> {
    pub config: Arc<BotConfig>,
    pub platform: Arc<P>,
    matcher: Arc<TriggerMatcher>,
    // Held from classification through posting so the submission and
    // comment workers of one account never both answer the same thread.
    critical_section: Arc<Mutex<()>>,
    recent_replies: Arc<StdMutex<BoundedSet>>,
    dry_run: bool,
}

impl<P: Platform> Clone for AccountContext<P> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            platform: self.platform.clone(),
            matcher: self.matcher.clone(),
            critical_section: self.critical_section.clone(),
            recent_replies: self.recent_replies.clone(),
            dry_run: self.dry_run,
        }
    }
}

impl<P: Platform> AccountContext<P> {
    pub fn new(config: BotConfig, platform: Arc<P>) -> Self {
        let matcher = TriggerMatcher::new(&config.trigger_words);
        Self {
            config: Arc::new(config),
            platform,
            matcher: Arc::new(matcher),
            critical_section: Arc::new(Mutex::new(())),
            recent_replies: Arc::new(StdMutex::new(BoundedSet::new(RECENT_REPLY_CAPACITY))),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// True if `fullname` is a reply this account posted recently.
    pub fn posted_recently(&self, fullname: &str) -> bool {
        self.recent_replies
            .lock()
            .map(|recent| recent.contains(fullname))
            .unwrap_or(false)
    }

    fn remember_reply(&self, fullname: &str) {
        if let Ok(mut recent) = self.recent_replies.lock() {
            recent.insert(fullname);
        }
    }
}

pub struct Dispatcher<P: Platform> {
    account: AccountContext<P>,
    subreddit: String,
    kind: ItemKind,
    state: DispatcherState,
    rng: fastrand::Rng,
    stats: DispatcherStats,
    health: Option<HealthRegistry>,
    max_pause: Duration,
}

impl<P: Platform> Dispatcher<P> {
    pub fn new(account: AccountContext<P>, subreddit: &str, kind: ItemKind) -> Self {
        Self {
            account,
            subreddit: subreddit.to_string(),
            kind,
            state: DispatcherState::Connecting,
            rng: fastrand::Rng::new(),
            stats: DispatcherStats::default(),
            health: None,
            max_pause: StreamOptions::default().max_pause,
        }
    }

    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = rng;
        self
    }

    /// Report `Running` to `health` once the stream is open.
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    pub fn id(&self) -> WorkerId {
        WorkerId::new(self.account.username(), &self.subreddit, self.kind)
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    fn set_state(&mut self, state: DispatcherState) {
        if self.state != state {
            debug!("{} -> {:?}", self.id(), state);
            self.state = state;
        }
    }

    /// Authenticate, open the stream and evaluate items until `shutdown`
    /// flips to `true` or the stream fails.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DispatcherStats, CoreError> {
        self.set_state(DispatcherState::Connecting);
        if *shutdown.borrow() {
            return Ok(self.stats.clone());
        }

        let me = self.account.platform.authenticate().await?;
        let options = StreamOptions {
            skip_existing: self.account.config.skip_existing,
            max_pause: self.max_pause,
        };
        let platform = self.account.platform.clone();
        let mut stream = match self.kind {
            ItemKind::Submission => platform.stream_new_submissions(&self.subreddit, options),
            ItemKind::Comment => platform.stream_new_comments(&self.subreddit, options),
        };

        info!("{} streaming {} from r/{}", me, self.kind.plural(), self.subreddit);
        if let Some(health) = &self.health {
            health.set(&self.id(), WorkerState::Running);
        }

        loop {
            self.set_state(DispatcherState::Streaming);
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        None
                    } else {
                        continue;
                    }
                }
                next = stream.next_item() => Some(next),
            };

            let item = match next {
                None => break,
                Some(Ok(item)) => item,
                Some(Err(e)) => {
                    return Err(CoreError::StreamConnection {
                        subreddit: self.subreddit.clone(),
                        kind: self.kind.plural().to_string(),
                        reason: e.to_string(),
                    })
                }
            };

            self.process_item(&item, &me).await?;
            self.set_state(DispatcherState::Idle);
        }

        info!(
            "{} closed {} stream of r/{}",
            me,
            self.kind.plural(),
            self.subreddit
        );
        Ok(self.stats.clone())
    }

    /// Classify one item and reply if every gate passes.
    ///
    /// Only a broken configuration is returned as an error; network trouble
    /// while classifying or posting ends up in the report.
    pub async fn process_item(&mut self, item: &Item, me: &Identity) -> Result<ItemReport, CoreError> {
        self.set_state(DispatcherState::Evaluating);
        let matched = self.account.matcher.is_match_any(item.text_fields());

        // The parent's author is fixed, so this lookup needs no lock.
        let addressed_to_me = match item.as_comment() {
            Some(_) if matched && item.is_authored_by(me) => false,
            Some(comment) => self.is_addressed_to(comment, me).await,
            None => false,
        };

        let critical_section = self.account.critical_section.clone();
        let _guard = critical_section.lock().await;

        let classification = self.classify(item, me, matched, addressed_to_me).await?;

        let outcome = match &classification {
            Classification::Reply { response, .. } => {
                self.set_state(DispatcherState::Replying);
                Some(self.reply(item, response).await)
            }
            _ => None,
        };
        self.stats.record(outcome.as_ref());

        info!(
            account = %self.account.username(),
            subreddit = %self.subreddit,
            kind = %self.kind,
            permalink = %item.permalink_url(),
            classification = classification.label(),
            outcome = outcome.as_ref().map(ReplyOutcome::label).unwrap_or("none"),
            "{}",
            classification.describe(self.kind)
        );

        Ok(ItemReport {
            fullname: item.fullname().to_string(),
            classification,
            outcome,
        })
    }

    async fn classify(
        &mut self,
        item: &Item,
        me: &Identity,
        matched: bool,
        addressed_to_me: bool,
    ) -> Result<Classification, CoreError> {
        let config = self.account.config.clone();

        if !matched && !addressed_to_me {
            return Ok(Classification::NonTriggering);
        }
        if item.is_authored_by(me) {
            return Ok(Classification::OwnItem);
        }

        match config.gate_order {
            GateOrder::SampleFirst => {
                if !should_reply_with(&mut self.rng, config.response_rate, addressed_to_me) {
                    return Ok(Classification::RandomlySkipped);
                }
                if let Some(skip) = self.duplicate_gate(item, me).await {
                    return Ok(skip);
                }
            }
            GateOrder::DedupFirst => {
                if let Some(skip) = self.duplicate_gate(item, me).await {
                    return Ok(skip);
                }
                if !should_reply_with(&mut self.rng, config.response_rate, addressed_to_me) {
                    return Ok(Classification::RandomlySkipped);
                }
            }
        }

        let response = select_response_with(&mut self.rng, &config.responses)?;
        Ok(Classification::Reply {
            response: response.to_string(),
            addressed_to_me,
        })
    }

    async fn is_addressed_to(&self, comment: &Comment, me: &Identity) -> bool {
        if self.account.posted_recently(&comment.parent_id) {
            return true;
        }
        match self.account.platform.parent_of(comment).await {
            Ok(parent) => parent.is_authored_by(me),
            Err(e) => {
                warn!(
                    "Could not look up parent of {}, treating it as not addressed to {}: {}",
                    comment.fullname, me, e
                );
                false
            }
        }
    }

    async fn duplicate_gate(&self, item: &Item, me: &Identity) -> Option<Classification> {
        match check_already_replied(self.account.platform.as_ref(), item, me).await {
            Ok(true) => Some(Classification::AlreadyReplied),
            Ok(false) => None,
            Err(e) => {
                e.log_warn();
                Some(Classification::DuplicateCheckFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn reply(&self, item: &Item, response: &str) -> ReplyOutcome {
        if self.account.is_dry_run() {
            debug!("Dry run, not replying to {}", item.fullname());
            return ReplyOutcome::DryRun;
        }

        match self.account.platform.post_reply(item, response).await {
            Ok(posted) => {
                self.account.remember_reply(&posted.fullname);
                debug!("Reply {} posted under {}", posted.fullname, item.fullname());
                ReplyOutcome::Posted(posted)
            }
            Err(e) => {
                e.log_warn();
                ReplyOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }
}
