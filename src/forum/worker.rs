//! Forum worker: blocking loop relaying between the forum and the channel.
//!
//! Each iteration:
//! 1. Drains envelopes sent by the chat side and submits them as posts.
//! 2. Scans one batch of new submissions.
//! 3. Scans one batch of new comments.
//!
//! Runs on its own OS thread. The only blocking channel call is `receive`,
//! and it is only made after `poll` said an envelope is waiting.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ForumError;
use crate::forum::{BatchStream, Comment, ForumClient, ForumItem, Submission};
use crate::relay::{DuplexEnd, Envelope, RelayFilter};

const SUBMISSION_ACK: &str = "Crossposted to Discord.";
const COMMENT_ACK: &str = "Crossposted to original submission to Discord.";

/// Counters for a single iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationStats {
    /// Envelopes from chat turned into forum posts.
    pub submitted: usize,
    pub scanned_submissions: usize,
    pub relayed_submissions: usize,
    pub scanned_comments: usize,
    pub relayed_comments: usize,
}

impl IterationStats {
    fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Blocking forum relay loop.
pub struct ForumWorker<F: ForumClient> {
    client: F,
    channel: DuplexEnd,
    filter: RelayFilter,
    pause: Duration,
    submissions: BatchStream<Submission>,
    comments: BatchStream<Comment>,
}

impl<F: ForumClient> ForumWorker<F> {
    /// Open both content streams. Items that already exist are not relayed.
    pub fn new(client: F, channel: DuplexEnd, filter: RelayFilter, pause: Duration) -> Self {
        let submissions = client.stream_new_submissions();
        let comments = client.stream_new_comments();
        Self {
            client,
            channel,
            filter,
            pause,
            submissions,
            comments,
        }
    }

    /// Loop until a fatal forum error.
    pub fn run(mut self) -> Result<(), ForumError> {
        info!(keyword = self.filter.keyword(), "Forum worker ready");
        loop {
            let stats = self.iterate()?;
            if !stats.is_idle() {
                debug!(?stats, "Forum iteration finished");
            }
            if !self.pause.is_zero() {
                std::thread::sleep(self.pause);
            }
        }
    }

    /// Run one drain/scan/scan cycle.
    pub fn iterate(&mut self) -> Result<IterationStats, ForumError> {
        let mut stats = IterationStats {
            submitted: self.drain_inbound(),
            ..Default::default()
        };
        (stats.scanned_submissions, stats.relayed_submissions) = self.scan_submissions()?;
        (stats.scanned_comments, stats.relayed_comments) = self.scan_comments()?;
        Ok(stats)
    }

    fn drain_inbound(&mut self) -> usize {
        let mut submitted = 0;
        while self.channel.poll() {
            let envelope = match self.channel.receive() {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Inbound drain stopped");
                    break;
                }
            };
            if self.submit(&envelope) {
                submitted += 1;
            }
        }
        submitted
    }

    fn submit(&self, envelope: &Envelope) -> bool {
        if envelope.title().trim().is_empty() {
            warn!("Dropping envelope from chat with empty title");
            return false;
        }
        match self.client.submit_post(envelope.title(), envelope.body()) {
            Ok(()) => {
                info!(title = envelope.title(), "Submitted chat relay to forum");
                true
            }
            Err(e) => {
                error!(title = envelope.title(), error = %e, "Forum submission failed");
                false
            }
        }
    }

    fn scan_submissions(&mut self) -> Result<(usize, usize), ForumError> {
        let (mut scanned, mut relayed) = (0, 0);
        while let Some(submission) = next_in_batch(&mut self.submissions, "submission")? {
            scanned += 1;
            if submission.selftext.is_empty() {
                continue;
            }
            debug!(id = %submission.id, "Processing submission");
            if !self.filter.matches(&submission.selftext) {
                continue;
            }
            let envelope = Envelope::new(&submission.title, &submission.selftext);
            if self.relay(envelope, &submission, SUBMISSION_ACK) {
                relayed += 1;
            }
        }
        Ok((scanned, relayed))
    }

    fn scan_comments(&mut self) -> Result<(usize, usize), ForumError> {
        let (mut scanned, mut relayed) = (0, 0);
        while let Some(comment) = next_in_batch(&mut self.comments, "comment")? {
            scanned += 1;
            if comment.body.is_empty() {
                continue;
            }
            debug!(id = %comment.id, "Processing comment");
            if !self.filter.matches(&comment.body) {
                continue;
            }
            let parent = match self.client.parent_submission(&comment) {
                Ok(parent) => parent,
                Err(e) => {
                    warn!(id = %comment.id, error = %e, "Could not load parent submission");
                    continue;
                }
            };
            let envelope = if parent.selftext.is_empty() {
                Envelope::titled(parent.title)
            } else {
                Envelope::new(parent.title, parent.selftext)
            };
            if self.relay(envelope, &comment, COMMENT_ACK) {
                relayed += 1;
            }
        }
        Ok((scanned, relayed))
    }

    /// Send outward, then acknowledge on the forum. Returns whether it was sent.
    fn relay(&self, envelope: Envelope, item: &dyn ForumItem, ack: &str) -> bool {
        if let Err(e) = self.channel.send(envelope) {
            warn!(item = item.fullname(), error = %e, "Could not hand off to chat");
            return false;
        }
        info!(item = item.fullname(), "Sending to chat");
        if let Err(e) = self.client.reply_to(item, ack) {
            warn!(item = item.fullname(), error = %e, "Acknowledgement reply failed");
        }
        true
    }
}

/// Pull the next item of a batch. Non-fatal fetch errors end the batch early.
fn next_in_batch<T: ForumItem>(
    stream: &mut BatchStream<T>,
    kind: &str,
) -> Result<Option<T>, ForumError> {
    match stream.next_item() {
        Ok(item) => Ok(item),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(kind, error = %e, "Fetch failed; skipping this batch");
            Ok(None)
        }
    }
}
