use crate::error::CoreError;
use crate::stream::{ItemStream, StreamOptions};
use crate::types::{Comment, Identity, Item, ItemKind, PostedReply, ReplyTree};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything the bot needs from the social platform.
///
/// Implementations are shared by every worker of one account, so they must
/// be safe to call concurrently.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Log in (or confirm an existing session) and return who we are.
    async fn authenticate(&self) -> Result<Identity, CoreError>;

    async fn current_identity(&self) -> Result<Identity, CoreError>;

    /// Newest items of `kind` in `subreddit`, newest first.
    async fn fetch_new(
        &self,
        subreddit: &str,
        kind: ItemKind,
        limit: u32,
    ) -> Result<Vec<Item>, CoreError>;

    /// Replies under `item` with every "load more" placeholder resolved.
    /// Submissions yield the whole comment forest; comments are refreshed
    /// first so replies posted since they were streamed are included.
    async fn expand_replies(&self, item: &Item) -> Result<ReplyTree, CoreError>;

    async fn post_reply(&self, item: &Item, text: &str) -> Result<PostedReply, CoreError>;

    async fn parent_of(&self, comment: &Comment) -> Result<Item, CoreError>;

    fn stream_new_submissions(self: Arc<Self>, subreddit: &str, options: StreamOptions) -> ItemStream<Self>
    where
        Self: Sized,
    {
        ItemStream::new(self, subreddit, ItemKind::Submission, options)
    }

    fn stream_new_comments(self: Arc<Self>, subreddit: &str, options: StreamOptions) -> ItemStream<Self>
    where
        Self: Sized,
    {
        ItemStream::new(self, subreddit, ItemKind::Comment, options)
    }
}
