//! Forum side of the relay: item types, client seam, batch streams, worker.

pub mod stream;
pub mod worker;

use serde::Deserialize;

use crate::error::ForumError;

pub use stream::BatchStream;
pub use worker::{ForumWorker, IterationStats};

/// Anything on the forum that can be tracked by id and replied to.
pub trait ForumItem {
    /// Short id, unique within the item kind.
    fn item_id(&self) -> &str;

    /// Kind-prefixed id used when replying (e.g. `t3_abc123`).
    fn fullname(&self) -> &str;
}

/// A top-level post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(rename = "name")]
    pub fullname: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
}

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(rename = "name")]
    pub fullname: String,
    #[serde(default)]
    pub body: String,
    /// Fullname of the submission this comment belongs to.
    #[serde(rename = "link_id")]
    pub link_fullname: String,
}

impl ForumItem for Submission {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn fullname(&self) -> &str {
        &self.fullname
    }
}

impl ForumItem for Comment {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn fullname(&self) -> &str {
        &self.fullname
    }
}

/// Blocking forum client used by the forum worker.
pub trait ForumClient {
    /// New top-level posts, skipping those that existed when the stream opened.
    fn stream_new_submissions(&self) -> BatchStream<Submission>;

    /// New comments, skipping those that existed when the stream opened.
    fn stream_new_comments(&self) -> BatchStream<Comment>;

    /// Create a self post.
    fn submit_post(&self, title: &str, body: &str) -> Result<(), ForumError>;

    /// Reply in-thread to a submission or comment.
    fn reply_to(&self, item: &dyn ForumItem, text: &str) -> Result<(), ForumError>;

    /// Look up the submission a comment was posted on.
    fn parent_submission(&self, comment: &Comment) -> Result<Submission, ForumError>;
}
