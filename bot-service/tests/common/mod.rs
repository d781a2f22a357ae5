#![allow(dead_code)]

use async_trait::async_trait;
use autoreply_core::{
    BotConfig, Comment, CoreError, GateOrder, Identity, Item, ItemKind, Platform, PostedReply,
    RedditApiError, Reply, ReplyTree, Submission,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const BOT: &str = "vbucks_helper";

/// In-memory Reddit: scripted listings, a reply store that grows as the
/// bot posts, and switches for the failures worth exercising.
#[derive(Default)]
pub struct MockPlatform {
    pub username: String,
    pub fail_auth: bool,
    pub reject_posts: bool,
    listings: Mutex<HashMap<(String, ItemKind), VecDeque<Vec<Item>>>>,
    items: Mutex<HashMap<String, Item>>,
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    broken_trees: Mutex<HashSet<String>>,
    pub posted: Mutex<Vec<(String, String)>>,
    pub expansions: Mutex<u32>,
    pub parent_lookups: Mutex<u32>,
}

impl MockPlatform {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Default::default()
        }
    }

    pub fn failing_auth(username: &str) -> Self {
        Self {
            fail_auth: true,
            ..Self::new(username)
        }
    }

    pub fn rejecting_posts(username: &str) -> Self {
        Self {
            reject_posts: true,
            ..Self::new(username)
        }
    }

    /// Queue one listing (newest first) for the next poll of `subreddit`.
    pub fn push_listing(&self, subreddit: &str, kind: ItemKind, items: Vec<Item>) {
        for item in &items {
            self.add_item(item.clone());
        }
        self.listings
            .lock()
            .unwrap()
            .entry((subreddit.to_string(), kind))
            .or_default()
            .push_back(items);
    }

    /// Make `item` known to `parent_of` lookups.
    pub fn add_item(&self, item: Item) {
        self.items
            .lock()
            .unwrap()
            .insert(item.fullname().to_string(), item);
    }

    pub fn add_reply(&self, parent: &str, fullname: &str, author: &str) {
        self.replies
            .lock()
            .unwrap()
            .entry(parent.to_string())
            .or_default()
            .push(Reply {
                fullname: fullname.to_string(),
                author: Some(author.to_string()),
                replies: Vec::new(),
            });
    }

    pub fn break_tree(&self, fullname: &str) {
        self.broken_trees
            .lock()
            .unwrap()
            .insert(fullname.to_string());
    }

    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn authenticate(&self) -> Result<Identity, CoreError> {
        if self.fail_auth {
            return Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: "invalid_grant".to_string(),
            }));
        }
        Ok(Identity::new(self.username.clone()))
    }

    async fn current_identity(&self) -> Result<Identity, CoreError> {
        self.authenticate().await
    }

    async fn fetch_new(
        &self,
        subreddit: &str,
        kind: ItemKind,
        _limit: u32,
    ) -> Result<Vec<Item>, CoreError> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get_mut(&(subreddit.to_string(), kind))
            .and_then(|batches| batches.pop_front())
            .unwrap_or_default())
    }

    async fn expand_replies(&self, item: &Item) -> Result<ReplyTree, CoreError> {
        *self.expansions.lock().unwrap() += 1;
        // Give other tasks a chance to run, as a real fetch would.
        tokio::task::yield_now().await;
        if self.broken_trees.lock().unwrap().contains(item.fullname()) {
            return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
        }
        let replies = self
            .replies
            .lock()
            .unwrap()
            .get(item.fullname())
            .cloned()
            .unwrap_or_default();
        Ok(ReplyTree::new(replies))
    }

    async fn post_reply(&self, item: &Item, text: &str) -> Result<PostedReply, CoreError> {
        if self.reject_posts {
            return Err(CoreError::ReplyRejected {
                thing_id: item.fullname().to_string(),
                reason: "THREAD_LOCKED: that thread is locked".to_string(),
            });
        }

        let mut posted = self.posted.lock().unwrap();
        let fullname = format!("t1_reply{}", posted.len());
        posted.push((item.fullname().to_string(), text.to_string()));
        drop(posted);

        self.add_reply(item.fullname(), &fullname, &self.username);
        Ok(PostedReply {
            fullname,
            permalink: None,
        })
    }

    async fn parent_of(&self, comment: &Comment) -> Result<Item, CoreError> {
        *self.parent_lookups.lock().unwrap() += 1;
        self.items
            .lock()
            .unwrap()
            .get(&comment.parent_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::ThingNotFound {
                    thing_id: comment.parent_id.clone(),
                })
            })
    }
}

pub fn bot_config(response_rate: f64) -> BotConfig {
    BotConfig {
        username: BOT.to_string(),
        subreddit_names: vec!["FortNiteBR".to_string()],
        trigger_words: vec!["giveaway".to_string()],
        response_rate,
        responses: vec![
            "Beware of scams!".to_string(),
            "Never share your password.".to_string(),
        ],
        gate_order: GateOrder::default(),
        skip_existing: false,
    }
}

pub fn submission(id: &str, title: &str, author: &str) -> Item {
    Item::Submission(Submission {
        id: id.to_string(),
        fullname: format!("t3_{id}"),
        title: title.to_string(),
        selftext: String::new(),
        author: Some(author.to_string()),
        subreddit: "FortNiteBR".to_string(),
        permalink: format!("/r/FortNiteBR/comments/{id}/"),
    })
}

pub fn comment(id: &str, body: &str, author: &str, parent_id: &str) -> Item {
    Item::Comment(Comment {
        id: id.to_string(),
        fullname: format!("t1_{id}"),
        body: body.to_string(),
        author: Some(author.to_string()),
        parent_id: parent_id.to_string(),
        link_id: "t3_post".to_string(),
        subreddit: "FortNiteBR".to_string(),
        permalink: format!("/r/FortNiteBR/comments/post/_/{id}/"),
    })
}
