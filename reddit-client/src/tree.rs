//! Collects comments out of Reddit's nested listings into flat entries,
//! remembering the "load more" placeholders still to be resolved.

use crate::api::{author_of, invalid_response, RedditListing, RedditListingChild, RedditMoreData, Thing};
use autoreply_core::{CoreError, ReplyEntry};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ReplyCollector {
    entries: Vec<ReplyEntry>,
    known: HashSet<String>,
    pending: Vec<RedditMoreData>,
    requested_ids: HashSet<String>,
    continued_parents: HashSet<String>,
}

/// Work left after filtering placeholders already resolved once.
#[derive(Debug, Default, PartialEq)]
pub struct PendingExpansion {
    /// Comment ids for `/api/morechildren`.
    pub child_ids: Vec<String>,
    /// Parent comment ids (no prefix) whose subtree must be fetched directly.
    pub continue_threads: Vec<String>,
}

impl PendingExpansion {
    pub fn is_empty(&self) -> bool {
        self.child_ids.is_empty() && self.continue_threads.is_empty()
    }
}

impl ReplyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk a listing value such as the second element of a comment page.
    pub fn collect_listing(&mut self, listing: Value) -> Result<(), CoreError> {
        let listing: RedditListing<Value> =
            serde_json::from_value(listing).map_err(|e| invalid_response("comment listing", e))?;
        self.collect_children(listing.data.children)
    }

    /// Add children from a flat source such as `/api/morechildren`.
    pub fn collect_children(&mut self, children: Vec<RedditListingChild<Value>>) -> Result<(), CoreError> {
        for child in children {
            match Thing::parse(child).map_err(|e| invalid_response("comment", e))? {
                Thing::Comment(mut comment) => {
                    let replies = std::mem::take(&mut comment.replies);
                    if self.known.insert(comment.name.clone()) {
                        self.entries.push(ReplyEntry {
                            fullname: comment.name,
                            parent_id: comment.parent_id,
                            author: author_of(comment.author),
                        });
                    }
                    if replies.is_object() {
                        self.collect_listing(replies)?;
                    }
                }
                Thing::More(more) => self.pending.push(more),
                Thing::Link(_) | Thing::Other(_) => {}
            }
        }
        Ok(())
    }

    /// Drain the placeholders collected so far into the next round of
    /// requests. Ids asked for before are dropped so a misbehaving response
    /// cannot loop forever.
    pub fn take_pending(&mut self) -> PendingExpansion {
        let mut next = PendingExpansion::default();
        for more in self.pending.drain(..) {
            if more.children.is_empty() {
                let parent = autoreply_core::strip_kind_prefix(&more.parent_id).to_string();
                if more.parent_id.starts_with("t1_") && self.continued_parents.insert(parent.clone()) {
                    next.continue_threads.push(parent);
                }
                continue;
            }
            for id in more.children {
                if self.requested_ids.insert(id.clone()) && !self.known.contains(&format!("t1_{}", id)) {
                    next.child_ids.push(id);
                }
            }
        }
        next
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<ReplyEntry> {
        self.entries
    }
}
