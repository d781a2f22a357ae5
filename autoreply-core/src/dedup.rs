use crate::error::{CoreError, RedditApiError};
use crate::platform::Platform;
use crate::types::{Identity, Item, ReplyTree};
use tracing::debug;

/// Whether `me` already answered `item`, judged from its expanded replies.
///
/// Submissions are checked at every depth of the comment forest. Comments
/// only count direct replies, so answering someone further down the thread
/// does not block answering this comment.
pub fn already_replied(item: &Item, replies: &ReplyTree, me: &Identity) -> bool {
    match item {
        Item::Submission(_) => replies.iter().any(|reply| reply.is_authored_by(me)),
        Item::Comment(_) => replies
            .direct_replies()
            .iter()
            .any(|reply| reply.is_authored_by(me)),
    }
}

/// Fetch the full reply tree of `item` and look for a reply by `me`.
///
/// Any failure while expanding the tree comes back as
/// `CoreError::PaginationExpansion` so the caller can skip just this item.
pub async fn check_already_replied<P: Platform + ?Sized>(
    platform: &P,
    item: &Item,
    me: &Identity,
) -> Result<bool, CoreError> {
    let replies = platform
        .expand_replies(item)
        .await
        .map_err(|e| match e {
            CoreError::PaginationExpansion { .. } => e,
            CoreError::RedditApi(RedditApiError::ThingNotFound { thing_id }) => {
                CoreError::PaginationExpansion {
                    thing_id,
                    reason: "item no longer exists".to_string(),
                }
            }
            other => CoreError::PaginationExpansion {
                thing_id: item.fullname().to_string(),
                reason: other.to_string(),
            },
        })?;

    let replied = already_replied(item, &replies, me);
    debug!(
        "Scanned {} replies of {} for {}: replied = {}",
        replies.len(),
        item.fullname(),
        me,
        replied
    );
    Ok(replied)
}
