//! Chat side of the relay: event types, client seam, commands, worker.

pub mod command;
pub mod worker;

use async_trait::async_trait;

use crate::error::ChatError;

pub use command::{Command, CommandError};
pub use worker::{ChatWorker, ChatWorkerConfig};

/// A resolved chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: String,
    /// Owning server; `None` for direct messages.
    pub guild_id: Option<String>,
}

impl ChannelHandle {
    pub fn new(id: impl Into<String>, guild_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            guild_id,
        }
    }
}

/// A message seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingChat {
    pub channel: ChannelHandle,
    pub author_is_bot: bool,
    pub content: String,
}

/// Events delivered by the chat client's dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The connection is established and the bot can act.
    Ready { user_name: String },
    Message(IncomingChat),
}

/// Async chat client used by the chat worker.
#[async_trait]
pub trait ChatClient: Send {
    /// Wait for the next event. `Ok(None)` means the connection is gone.
    ///
    /// Must be cancel-safe: the worker races it against its relay timer.
    async fn next_event(&mut self) -> Result<Option<ChatEvent>, ChatError>;

    /// Post a message to a channel.
    async fn send(&self, channel: &ChannelHandle, text: &str) -> Result<(), ChatError>;

    /// Look up a channel by id.
    async fn resolve_channel(&self, id: &str) -> Result<ChannelHandle, ChatError>;
}
