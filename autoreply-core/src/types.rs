use std::collections::HashMap;
use std::fmt;

pub const REDDIT_WEB_BASE: &str = "https://www.reddit.com";

/// A Reddit account name. Reddit treats usernames case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is(&self, author: &str) -> bool {
        self.0.eq_ignore_ascii_case(author)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u/{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Submission,
    Comment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Submission => "submission",
            ItemKind::Comment => "comment",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ItemKind::Submission => "submissions",
            ItemKind::Comment => "comments",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    /// `t3_` prefixed id.
    pub fullname: String,
    pub title: String,
    pub selftext: String,
    /// `None` once the author deleted their account.
    pub author: Option<String>,
    pub subreddit: String,
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    /// `t1_` prefixed id.
    pub fullname: String,
    pub body: String,
    pub author: Option<String>,
    /// Fullname of the comment or submission this comment answers.
    pub parent_id: String,
    /// Fullname of the submission the comment lives under.
    pub link_id: String,
    pub subreddit: String,
    pub permalink: String,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.parent_id == self.link_id
    }

    /// Submission id without the `t3_` prefix.
    pub fn submission_id(&self) -> &str {
        strip_kind_prefix(&self.link_id)
    }
}

/// Something new that showed up in a subreddit stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Submission(Submission),
    Comment(Comment),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Submission(_) => ItemKind::Submission,
            Item::Comment(_) => ItemKind::Comment,
        }
    }

    pub fn fullname(&self) -> &str {
        match self {
            Item::Submission(s) => &s.fullname,
            Item::Comment(c) => &c.fullname,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            Item::Submission(s) => s.author.as_deref(),
            Item::Comment(c) => c.author.as_deref(),
        }
    }

    /// Text that trigger words are tested against. Submission title and body
    /// are kept apart so a match never straddles the two.
    pub fn text_fields(&self) -> Vec<&str> {
        match self {
            Item::Submission(s) => vec![s.title.as_str(), s.selftext.as_str()],
            Item::Comment(c) => vec![c.body.as_str()],
        }
    }

    pub fn permalink(&self) -> &str {
        match self {
            Item::Submission(s) => &s.permalink,
            Item::Comment(c) => &c.permalink,
        }
    }

    pub fn permalink_url(&self) -> String {
        format!("{}{}", REDDIT_WEB_BASE, self.permalink())
    }

    pub fn is_authored_by(&self, identity: &Identity) -> bool {
        self.author().map(|a| identity.is(a)).unwrap_or(false)
    }

    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            Item::Comment(c) => Some(c),
            Item::Submission(_) => None,
        }
    }
}

/// One node of an expanded reply tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub fullname: String,
    pub author: Option<String>,
    pub replies: Vec<Reply>,
}

impl Reply {
    pub fn is_authored_by(&self, identity: &Identity) -> bool {
        self.author.as_deref().map(|a| identity.is(a)).unwrap_or(false)
    }
}

/// Flat record of a comment as collected while walking listings and
/// resolving "load more" placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEntry {
    pub fullname: String,
    pub parent_id: String,
    pub author: Option<String>,
}

/// The replies attached to an item with every pagination placeholder resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyTree {
    pub replies: Vec<Reply>,
}

impl ReplyTree {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self { replies }
    }

    /// Assemble a tree rooted at `root` from flat entries. Entries whose
    /// parent chain never reaches `root` are dropped.
    pub fn from_entries(root: &str, entries: Vec<ReplyEntry>) -> Self {
        let mut by_parent: HashMap<String, Vec<ReplyEntry>> = HashMap::new();
        for entry in entries {
            by_parent
                .entry(entry.parent_id.clone())
                .or_default()
                .push(entry);
        }

        Self {
            replies: build_children(root, &mut by_parent),
        }
    }

    pub fn direct_replies(&self) -> &[Reply] {
        &self.replies
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Total number of replies at every depth.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Depth-first walk over every reply.
    pub fn iter(&self) -> impl Iterator<Item = &Reply> {
        let mut stack: Vec<&Reply> = self.replies.iter().rev().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.replies.iter().rev());
            Some(next)
        })
    }
}

fn build_children(parent: &str, by_parent: &mut HashMap<String, Vec<ReplyEntry>>) -> Vec<Reply> {
    let Some(children) = by_parent.remove(parent) else {
        return Vec::new();
    };

    children
        .into_iter()
        .map(|entry| {
            let replies = build_children(&entry.fullname, by_parent);
            Reply {
                fullname: entry.fullname,
                author: entry.author,
                replies,
            }
        })
        .collect()
}

/// The comment created by a successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedReply {
    pub fullname: String,
    pub permalink: Option<String>,
}

pub fn strip_kind_prefix(fullname: &str) -> &str {
    match fullname.split_once('_') {
        Some((prefix, id)) if prefix.len() == 2 && prefix.starts_with('t') => id,
        _ => fullname,
    }
}
