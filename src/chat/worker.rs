//! Chat worker: cooperative event loop on the chat client's dispatcher.
//!
//! Everything here runs on one task: event handlers and the periodic relay
//! task never execute concurrently, but they interleave at await points. The
//! duplex channel is only ever touched through its non-blocking calls so the
//! scheduler is never stalled.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::chat::{ChannelHandle, ChatClient, ChatEvent, Command, IncomingChat};
use crate::error::ChatError;
use crate::relay::{DuplexEnd, Envelope};

/// Settings for the chat worker.
#[derive(Debug, Clone)]
pub struct ChatWorkerConfig {
    /// Command prefix, e.g. `!`.
    pub prefix: String,
    /// Channel forum posts are relayed to until `set-destination` overrides it.
    pub default_channel_id: Option<String>,
    /// Period of the relay task. One envelope is relayed per tick.
    pub relay_interval: Duration,
    /// Name of the forum shown in relayed messages.
    pub source_label: String,
}

impl Default for ChatWorkerConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            default_channel_id: None,
            relay_interval: Duration::from_secs(5),
            source_label: "Reddit".to_string(),
        }
    }
}

/// What woke the event loop.
enum Wake {
    Event(Result<Option<ChatEvent>, ChatError>),
    Tick,
}

/// Chat relay worker.
pub struct ChatWorker<C: ChatClient> {
    client: C,
    channel: DuplexEnd,
    config: ChatWorkerConfig,
    destination: Option<ChannelHandle>,
    armed: bool,
    /// The forum side has hung up and its queue is drained.
    peer_gone: bool,
}

impl<C: ChatClient> ChatWorker<C> {
    pub fn new(client: C, channel: DuplexEnd, config: ChatWorkerConfig) -> Self {
        Self {
            client,
            channel,
            config,
            destination: None,
            armed: false,
            peer_gone: false,
        }
    }

    /// Current relay destination.
    pub fn destination(&self) -> Option<&ChannelHandle> {
        self.destination.as_ref()
    }

    /// Dispatch events and relay ticks until the chat connection ends.
    pub async fn run(mut self) -> Result<(), ChatError> {
        let mut ticker: Option<Interval> = None;

        loop {
            let wake = tokio::select! {
                event = self.client.next_event() => Wake::Event(event),
                _ = next_tick(&mut ticker) => Wake::Tick,
            };

            match wake {
                Wake::Tick => {
                    self.relay_tick().await;
                }
                Wake::Event(Ok(Some(event))) => {
                    if self.handle_event(event).await {
                        let mut interval = tokio::time::interval(self.config.relay_interval);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker = Some(interval);
                    }
                }
                Wake::Event(Ok(None)) => {
                    warn!("Chat connection closed");
                    return Err(ChatError::Disconnected);
                }
                Wake::Event(Err(e)) => {
                    error!(error = %e, "Chat event stream failed");
                    return Err(e);
                }
            }
        }
    }

    /// Handle one event. Returns true when the relay task should be armed.
    async fn handle_event(&mut self, event: ChatEvent) -> bool {
        match event {
            ChatEvent::Ready { user_name } => self.on_ready(&user_name).await,
            ChatEvent::Message(message) => {
                self.on_message(message).await;
                false
            }
        }
    }

    async fn on_ready(&mut self, user_name: &str) -> bool {
        if self.armed {
            debug!("Chat connection re-established");
            return false;
        }

        if let Some(id) = self.config.default_channel_id.clone() {
            match self.client.resolve_channel(&id).await {
                Ok(handle) => {
                    info!(channel = %handle.id, "Relay destination resolved");
                    self.destination = Some(handle);
                }
                Err(e) => {
                    warn!(channel = %id, error = %e, "Could not resolve default channel");
                }
            }
        }

        self.armed = true;
        info!("{user_name} has connected to chat");
        true
    }

    /// Relay at most one waiting envelope to the destination.
    ///
    /// Returns true when an envelope was taken off the channel.
    pub async fn relay_tick(&mut self) -> bool {
        let Some(destination) = self.destination.clone() else {
            return false;
        };
        if !self.channel.poll() {
            if !self.peer_gone && !self.channel.peer_available() {
                warn!("Forum side is gone; nothing more will be relayed to chat");
                self.peer_gone = true;
            }
            return false;
        }
        let Ok(Some(envelope)) = self.channel.try_receive() else {
            return false;
        };

        debug!(title = envelope.title(), "Chat got forum relay");
        let text = self.render(&envelope);
        if let Err(e) = self.client.send(&destination, &text).await {
            error!(channel = %destination.id, error = %e, "Dropping forum relay");
        }
        true
    }

    fn render(&self, envelope: &Envelope) -> String {
        format!(
            "Cross-post from {}:\n{}:\n{}",
            self.config.source_label,
            envelope.title(),
            envelope.body()
        )
    }

    async fn on_message(&mut self, message: IncomingChat) {
        if message.author_is_bot {
            return;
        }
        let reply = match Command::parse(&self.config.prefix, &message.content) {
            None => return,
            Some(Err(e)) => {
                debug!(error = %e, "Bad command arguments");
                format!("{e}. {}", Command::relay_usage(&self.config.prefix))
            }
            Some(Ok(command)) => {
                debug!(%command, channel = %message.channel.id, "Command received");
                self.execute(command, &message.channel)
            }
        };

        if let Err(e) = self.client.send(&message.channel, &reply).await {
            warn!(channel = %message.channel.id, error = %e, "Command reply failed");
        }
    }

    fn execute(&mut self, command: Command, channel: &ChannelHandle) -> String {
        let prefix = &self.config.prefix;
        match command {
            Command::Ping => format!("Pong{prefix}"),
            Command::Info => format!(
                "Info:\n\tChannel: {}\n\tGuild: {}",
                channel.id,
                channel.guild_id.as_deref().unwrap_or("none")
            ),
            Command::SetDestination => {
                info!(channel = %channel.id, "Relay destination changed");
                self.destination = Some(channel.clone());
                "Channel set.".to_string()
            }
            Command::Relay { title, body } => {
                let envelope = if body.is_empty() {
                    Envelope::titled(title)
                } else {
                    Envelope::new(title, body)
                };
                match self.channel.send(envelope) {
                    Ok(()) => "Sent to reddit.".to_string(),
                    Err(e) => {
                        error!(error = %e, "Could not hand off to forum");
                        "Forum relay is unavailable.".to_string()
                    }
                }
            }
            Command::Help => Command::help(prefix),
            Command::Unknown(name) => {
                format!("Unknown command `{name}`. Try {prefix}help.")
            }
        }
    }
}

/// Wait for the next tick, or forever if the relay task is not armed yet.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ChannelError;
    use crate::relay::duplex;

    type Sent = Arc<Mutex<Vec<(String, String)>>>;

    struct FakeChat {
        events: mpsc::UnboundedReceiver<ChatEvent>,
        sent: Sent,
        fail_send: bool,
    }

    #[async_trait]
    impl ChatClient for FakeChat {
        async fn next_event(&mut self) -> Result<Option<ChatEvent>, ChatError> {
            Ok(self.events.recv().await)
        }

        async fn send(&self, channel: &ChannelHandle, text: &str) -> Result<(), ChatError> {
            if self.fail_send {
                return Err(ChatError::SendFailed {
                    channel: channel.id.clone(),
                    reason: "503".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel.id.clone(), text.to_string()));
            Ok(())
        }

        async fn resolve_channel(&self, id: &str) -> Result<ChannelHandle, ChatError> {
            if id == "missing" {
                return Err(ChatError::ChannelNotFound(id.to_string()));
            }
            Ok(ChannelHandle::new(id, Some("guild-1".into())))
        }
    }

    struct Harness {
        worker: ChatWorker<FakeChat>,
        forum: DuplexEnd,
        events: mpsc::UnboundedSender<ChatEvent>,
        sent: Sent,
    }

    fn harness(default_channel: Option<&str>) -> Harness {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sent = Sent::default();
        let client = FakeChat {
            events: events_rx,
            sent: Arc::clone(&sent),
            fail_send: false,
        };
        let (forum, chat) = duplex();
        let config = ChatWorkerConfig {
            default_channel_id: default_channel.map(str::to_string),
            ..Default::default()
        };
        Harness {
            worker: ChatWorker::new(client, chat, config),
            forum,
            events: events_tx,
            sent,
        }
    }

    fn message(channel: &str, content: &str) -> ChatEvent {
        ChatEvent::Message(IncomingChat {
            channel: ChannelHandle::new(channel, Some("guild-1".into())),
            author_is_bot: false,
            content: content.to_string(),
        })
    }

    fn ready() -> ChatEvent {
        ChatEvent::Ready {
            user_name: "cerberus".into(),
        }
    }

    fn sent(h: &Harness) -> Vec<(String, String)> {
        h.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn ready_resolves_destination_and_arms_once() {
        let mut h = harness(Some("general"));
        assert!(h.worker.handle_event(ready()).await);
        assert_eq!(h.worker.destination().unwrap().id, "general");
        assert!(!h.worker.handle_event(ready()).await);
    }

    #[tokio::test]
    async fn unresolvable_default_still_arms() {
        let mut h = harness(Some("missing"));
        assert!(h.worker.handle_event(ready()).await);
        assert!(h.worker.destination().is_none());
    }

    #[tokio::test]
    async fn one_envelope_per_tick() {
        let mut h = harness(Some("general"));
        h.worker.handle_event(ready()).await;
        for i in 0..3 {
            h.forum.send(Envelope::new(format!("T{i}"), "B")).unwrap();
        }

        assert!(h.worker.relay_tick().await);
        assert_eq!(sent(&h).len(), 1);
        assert!(h.worker.relay_tick().await);
        assert!(h.worker.relay_tick().await);
        assert_eq!(sent(&h).len(), 3);

        // Queue drained: further ticks do nothing.
        assert!(!h.worker.relay_tick().await);
        assert_eq!(sent(&h).len(), 3);

        let titles: Vec<_> = sent(&h).into_iter().map(|(_, text)| text).collect();
        assert!(titles[0].contains("T0"));
        assert!(titles[1].contains("T1"));
        assert!(titles[2].contains("T2"));
    }

    #[tokio::test]
    async fn relay_message_contains_title_and_body() {
        let mut h = harness(Some("general"));
        h.worker.handle_event(ready()).await;
        h.forum.send(Envelope::new("T", "B")).unwrap();

        h.worker.relay_tick().await;
        assert_eq!(
            sent(&h),
            vec![(
                "general".to_string(),
                "Cross-post from Reddit:\nT:\nB".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn tick_without_destination_keeps_envelopes_queued() {
        let mut h = harness(None);
        h.worker.handle_event(ready()).await;
        h.forum.send(Envelope::new("T", "B")).unwrap();

        assert!(!h.worker.relay_tick().await);
        assert!(sent(&h).is_empty());

        h.worker.handle_event(message("ops", "!set_channel")).await;
        assert!(h.worker.relay_tick().await);
        assert_eq!(sent(&h).last().unwrap().0, "ops");
    }

    #[tokio::test]
    async fn failed_send_drops_envelope() {
        let mut h = harness(Some("general"));
        h.worker.handle_event(ready()).await;
        h.worker.client.fail_send = true;
        h.forum.send(Envelope::new("T", "B")).unwrap();

        assert!(h.worker.relay_tick().await);
        h.worker.client.fail_send = false;
        assert!(!h.worker.relay_tick().await);
        assert!(sent(&h).is_empty());
    }

    #[tokio::test]
    async fn forum_hangup_is_noticed_once_after_queue_drains() {
        let Harness {
            mut worker,
            forum,
            sent: log,
            ..
        } = harness(Some("general"));
        worker.handle_event(ready()).await;
        forum.send(Envelope::new("last", "words")).unwrap();
        drop(forum);

        assert!(worker.relay_tick().await);
        assert!(!worker.peer_gone);
        assert_eq!(log.lock().unwrap().len(), 1);

        assert!(!worker.relay_tick().await);
        assert!(worker.peer_gone);
        assert!(!worker.relay_tick().await);
        assert!(worker.peer_gone);
    }

    #[tokio::test]
    async fn ping_and_info_reply_in_channel() {
        let mut h = harness(None);
        h.worker.handle_event(message("c1", "!ping")).await;
        h.worker.handle_event(message("c1", "!info")).await;

        assert_eq!(
            sent(&h),
            vec![
                ("c1".to_string(), "Pong!".to_string()),
                (
                    "c1".to_string(),
                    "Info:\n\tChannel: c1\n\tGuild: guild-1".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn info_in_direct_message_has_no_guild() {
        let mut h = harness(None);
        h.worker
            .handle_event(ChatEvent::Message(IncomingChat {
                channel: ChannelHandle::new("dm", None),
                author_is_bot: false,
                content: "!info".into(),
            }))
            .await;
        assert!(sent(&h)[0].1.ends_with("Guild: none"));
    }

    #[tokio::test]
    async fn set_destination_rebinds() {
        let mut h = harness(Some("general"));
        h.worker.handle_event(ready()).await;
        h.worker.handle_event(message("ops", "!set-destination")).await;

        assert_eq!(h.worker.destination().unwrap().id, "ops");
        assert_eq!(sent(&h), vec![("ops".to_string(), "Channel set.".to_string())]);
    }

    #[tokio::test]
    async fn relay_command_sends_envelope_to_forum() {
        let mut h = harness(None);
        h.worker
            .handle_event(message("c1", r#"!relay "T" "B""#))
            .await;

        assert_eq!(h.forum.try_receive(), Ok(Some(Envelope::new("T", "B"))));
        assert_eq!(sent(&h), vec![("c1".to_string(), "Sent to reddit.".to_string())]);
    }

    #[tokio::test]
    async fn relay_command_usage_error_is_reported() {
        let mut h = harness(None);
        h.worker.handle_event(message("c1", "!relay lonely")).await;

        assert!(!h.forum.poll());
        let reply = &sent(&h)[0].1;
        assert!(reply.contains("Usage: !relay"), "got: {reply}");
    }

    #[tokio::test]
    async fn relay_command_with_forum_gone_reports_unavailable() {
        let Harness {
            mut worker,
            forum,
            sent,
            events: _events,
        } = harness(None);
        drop(forum);
        assert_eq!(
            worker.channel.send(Envelope::titled("probe")),
            Err(ChannelError::PeerUnavailable)
        );

        worker.handle_event(message("c1", "!relay T B")).await;
        assert_eq!(
            sent.lock().unwrap()[0].1,
            "Forum relay is unavailable.".to_string()
        );
    }

    #[tokio::test]
    async fn bots_and_plain_chatter_are_ignored() {
        let mut h = harness(None);
        h.worker
            .handle_event(ChatEvent::Message(IncomingChat {
                channel: ChannelHandle::new("c1", None),
                author_is_bot: true,
                content: "!ping".into(),
            }))
            .await;
        h.worker.handle_event(message("c1", "just talking")).await;
        assert!(sent(&h).is_empty());
    }

    #[tokio::test]
    async fn unknown_command_gets_hint() {
        let mut h = harness(None);
        h.worker.handle_event(message("c1", "!dance")).await;
        assert_eq!(sent(&h)[0].1, "Unknown command `dance`. Try !help.");
    }

    #[tokio::test(start_paused = true)]
    async fn run_relays_on_timer_after_ready() {
        let h = harness(Some("general"));
        let Harness {
            worker,
            forum,
            events,
            sent,
        } = h;
        forum.send(Envelope::new("A", "1")).unwrap();
        forum.send(Envelope::new("B", "2")).unwrap();

        let task = tokio::spawn(worker.run());
        events.send(ready()).unwrap();

        // First tick fires immediately, the second one interval later.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sent.lock().unwrap().len(), 2);

        drop(events);
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ChatError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_relay_before_ready() {
        let Harness {
            worker,
            forum,
            events,
            sent,
        } = harness(Some("general"));
        forum.send(Envelope::new("A", "1")).unwrap();

        let task = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sent.lock().unwrap().is_empty());

        drop(events);
        assert!(task.await.unwrap().is_err());
    }
}
