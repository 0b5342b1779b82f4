//! Discord client: Gateway WebSocket for events, REST API for sending.
//!
//! The gateway runs in its own task and forwards `ChatEvent`s over an mpsc
//! channel, so `next_event` is a plain (cancel-safe) channel receive. The task
//! reconnects by itself, resuming the session whenever Discord allows it; only
//! a refused session or repeated failures reach the receiver as an error.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::chat::{ChannelHandle, ChatClient, ChatEvent, IncomingChat};
use crate::config::{Lookup, optional, required};
use crate::error::{ChatError, ConfigError};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_MAX_MESSAGE_LEN: usize = 2000;

/// Intents: GUILDS (1) | GUILD_MESSAGES (512) | DIRECT_MESSAGES (4096) | MESSAGE_CONTENT (32768)
const GATEWAY_INTENTS: u64 = 1 | 512 | 4096 | 32768;

// ── Configuration ───────────────────────────────────────────────────

/// Discord bot settings.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: SecretString,
    pub prefix: String,
    pub default_channel_id: Option<String>,
}

impl DiscordConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            token: SecretString::from(required(lookup, "DISCORD_TOKEN")?),
            prefix: optional(lookup, "DISCORD_PREFIX").unwrap_or_else(|| "!".to_string()),
            default_channel_id: optional(lookup, "DISCORD_DEFAULT_CHANNEL_ID"),
        })
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Connected Discord bot.
pub struct DiscordClient {
    http: Client,
    token: SecretString,
    events: mpsc::Receiver<Result<ChatEvent, ChatError>>,
    gateway: JoinHandle<()>,
}

impl DiscordClient {
    /// Look up the gateway and start the event task.
    pub async fn connect(token: SecretString) -> Result<Self, ChatError> {
        let http = Client::new();
        let url = fetch_gateway_url(&http, &token).await?;
        info!("Connecting to Discord Gateway: {}", url);

        let (tx, rx) = mpsc::channel(256);
        let gateway = tokio::spawn(run_gateway(url, token.clone(), tx, RetryPolicy::default()));
        Ok(Self {
            http,
            token,
            events: rx,
            gateway,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token.expose_secret())
    }

    async fn send_chunk(&self, channel_id: &str, chunk: &str) -> Result<(), ChatError> {
        let resp = self
            .http
            .post(format!("{DISCORD_API_BASE}/channels/{channel_id}/messages"))
            .header("Authorization", self.auth_header())
            .json(&json!({ "content": chunk }))
            .send()
            .await
            .map_err(|e| ChatError::SendFailed {
                channel: channel_id.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::SendFailed {
                channel: channel_id.to_string(),
                reason: format!("{status}: {body}"),
            });
        }
        Ok(())
    }
}

impl Drop for DiscordClient {
    fn drop(&mut self) {
        self.gateway.abort();
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn next_event(&mut self) -> Result<Option<ChatEvent>, ChatError> {
        match self.events.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send(&self, channel: &ChannelHandle, text: &str) -> Result<(), ChatError> {
        for chunk in split_message(text, DISCORD_MAX_MESSAGE_LEN) {
            self.send_chunk(&channel.id, &chunk).await?;
        }
        Ok(())
    }

    async fn resolve_channel(&self, id: &str) -> Result<ChannelHandle, ChatError> {
        let resp = self
            .http
            .get(format!("{DISCORD_API_BASE}/channels/{id}"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                return Err(ChatError::ChannelNotFound(id.to_string()));
            }
            s => {
                return Err(ChatError::Connection(format!("GET channel returned {s}")));
            }
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ChatError::InvalidPayload(e.to_string()))?;
        parse_channel(&body).ok_or_else(|| ChatError::InvalidPayload("channel without id".into()))
    }
}

// ── Gateway ─────────────────────────────────────────────────────────

type EventSender = mpsc::Sender<Result<ChatEvent, ChatError>>;

/// How hard the gateway task tries to stay connected.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    /// First backoff; doubled per consecutive failure.
    base_delay: Duration,
    /// Consecutive sessions that may fail before the task gives up.
    max_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_failures: 5,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(6);
        self.base_delay.saturating_mul(factor)
    }
}

/// Session details kept across connections so a dropped session can resume.
#[derive(Debug, Default)]
struct ResumeState {
    session_id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
    /// The current connection got as far as READY or RESUMED.
    established: bool,
}

impl ResumeState {
    fn forget(&mut self) {
        *self = Self::default();
    }

    fn connect_url(&self, default_url: &str) -> String {
        match (&self.session_id, &self.resume_url) {
            (Some(_), Some(url)) => gateway_query(url),
            _ => default_url.to_string(),
        }
    }

    /// Opcode 6 payload, when there is a session to resume.
    fn resume_payload(&self, token: &SecretString) -> Option<Value> {
        let session_id = self.session_id.as_deref()?;
        Some(json!({
            "op": 6,
            "d": {
                "token": token.expose_secret(),
                "session_id": session_id,
                "seq": self.sequence,
            }
        }))
    }
}

/// Why a session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Connect again; `resume` says whether the old session may continue.
    Reconnect { resume: bool },
    /// The client was dropped; nobody is listening.
    ReceiverGone,
}

fn gateway_query(url: &str) -> String {
    format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
}

async fn fetch_gateway_url(client: &Client, token: &SecretString) -> Result<String, ChatError> {
    let resp = client
        .get(format!("{DISCORD_API_BASE}/gateway/bot"))
        .header("Authorization", format!("Bot {}", token.expose_secret()))
        .send()
        .await
        .map_err(|e| ChatError::Connection(format!("Failed to get Discord gateway URL: {e}")))?;

    if resp.status() == StatusCode::UNAUTHORIZED {
        return Err(ChatError::Rejected("Discord rejected the bot token".into()));
    }

    let body: Value = resp
        .json()
        .await
        .map_err(|e| ChatError::InvalidPayload(e.to_string()))?;
    let url = body["url"]
        .as_str()
        .ok_or_else(|| ChatError::InvalidPayload("Missing 'url' in gateway response".into()))?;
    Ok(gateway_query(url))
}

/// Keep a gateway session alive, reconnecting (and resuming when Discord
/// allows it) until the session is refused or retries run out.
async fn run_gateway(url: String, token: SecretString, tx: EventSender, retry: RetryPolicy) {
    let mut state = ResumeState::default();
    let mut failures = 0u32;

    loop {
        let target = state.connect_url(&url);
        let outcome = gateway_session(&target, &token, &mut state, &tx).await;

        let (resume, failure) = match outcome {
            Ok(SessionEnd::ReceiverGone) => {
                debug!("Discord event receiver dropped");
                return;
            }
            Err(e @ ChatError::Rejected(_)) => {
                error!(error = %e, "Discord gateway refused the bot");
                let _ = tx.send(Err(e)).await;
                return;
            }
            Ok(SessionEnd::Reconnect { resume }) => (resume, None),
            Err(e) => (true, Some(e)),
        };

        failures = if state.established { 0 } else { failures + 1 };
        if failures > retry.max_failures {
            let e = failure.unwrap_or_else(|| {
                ChatError::Connection("Discord gateway keeps closing the connection".into())
            });
            error!(error = %e, attempts = failures, "Giving up on the Discord gateway");
            let _ = tx.send(Err(e)).await;
            return;
        }

        if !resume {
            state.forget();
        }
        match &failure {
            Some(e) => warn!(error = %e, resume, "Discord gateway connection lost; reconnecting"),
            None => info!(resume, "Reconnecting to Discord Gateway"),
        }

        let delay = if failures == 0 && resume {
            Duration::ZERO
        } else {
            retry.delay(failures.max(1))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// One websocket connection: Hello, Identify or Resume, then dispatch until
/// the connection ends.
async fn gateway_session(
    url: &str,
    token: &SecretString,
    state: &mut ResumeState,
    tx: &EventSender,
) -> Result<SessionEnd, ChatError> {
    let connection_error = |e: tokio_tungstenite::tungstenite::Error| ChatError::Connection(e.to_string());
    state.established = false;

    let (ws_stream, _) = connect_async(url).await.map_err(connection_error)?;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    // Hello (opcode 10) carries the heartbeat interval.
    let hello = ws_read
        .next()
        .await
        .ok_or(ChatError::Disconnected)?
        .map_err(connection_error)?;
    let hello: Value = serde_json::from_str(hello.to_text().map_err(connection_error)?)
        .map_err(|e| ChatError::InvalidPayload(e.to_string()))?;
    let heartbeat_ms = heartbeat_interval(&hello)?;
    debug!("Discord heartbeat interval: {}ms", heartbeat_ms);

    let opening = match state.resume_payload(token) {
        Some(resume) => {
            debug!("Resuming Discord session");
            resume
        }
        None => identify_payload(token),
    };
    ws_write
        .send(WsMessage::Text(opening.to_string().into()))
        .await
        .map_err(connection_error)?;

    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                ws_write
                    .send(WsMessage::Text(heartbeat_payload(state.sequence).to_string().into()))
                    .await
                    .map_err(connection_error)?;
            }
            frame = ws_read.next() => {
                let Some(frame) = frame else {
                    return Ok(SessionEnd::Reconnect { resume: true });
                };
                let text = match frame.map_err(connection_error)? {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(frame) => {
                        return close_action(frame.map(|f| u16::from(f.code)));
                    }
                    _ => continue,
                };
                let payload: Value = match serde_json::from_str(text.as_str()) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Unparseable gateway frame: {e}");
                        continue;
                    }
                };
                if let Some(s) = payload["s"].as_u64() {
                    state.sequence = Some(s);
                }

                match payload["op"].as_u64() {
                    Some(0) => {
                        track_session(&payload, state);
                        if let Some(event) = parse_dispatch(&payload) {
                            if tx.send(Ok(event)).await.is_err() {
                                return Ok(SessionEnd::ReceiverGone);
                            }
                        }
                    }
                    Some(1) => {
                        ws_write
                            .send(WsMessage::Text(heartbeat_payload(state.sequence).to_string().into()))
                            .await
                            .map_err(connection_error)?;
                    }
                    Some(7) => {
                        debug!("Discord requested a reconnect");
                        return Ok(SessionEnd::Reconnect { resume: true });
                    }
                    Some(9) => {
                        let resume = payload["d"].as_bool() == Some(true);
                        debug!(resume, "Discord invalidated the session");
                        return Ok(SessionEnd::Reconnect { resume });
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Record session id and resume URL from READY; mark the session live on
/// READY or RESUMED.
fn track_session(payload: &Value, state: &mut ResumeState) {
    match payload["t"].as_str() {
        Some("READY") => {
            let data = &payload["d"];
            state.session_id = data["session_id"].as_str().map(String::from);
            state.resume_url = data["resume_gateway_url"].as_str().map(String::from);
            state.established = true;
        }
        Some("RESUMED") => {
            info!("Discord session resumed");
            state.established = true;
        }
        _ => {}
    }
}

/// Decide what a close frame means. Codes that no retry can fix are errors.
fn close_action(code: Option<u16>) -> Result<SessionEnd, ChatError> {
    match code {
        // Authentication failed, bad shard, sharding required, bad API
        // version, invalid or disallowed intents.
        Some(code @ (4004 | 4010..=4014)) => Err(ChatError::Rejected(format!(
            "gateway closed with code {code}"
        ))),
        // Invalid sequence, session timed out.
        Some(4007 | 4009) => Ok(SessionEnd::Reconnect { resume: false }),
        _ => Ok(SessionEnd::Reconnect { resume: true }),
    }
}

fn heartbeat_interval(hello: &Value) -> Result<u64, ChatError> {
    if hello["op"].as_u64() != Some(10) {
        return Err(ChatError::InvalidPayload(format!("expected Hello, got {hello}")));
    }
    hello["d"]["heartbeat_interval"]
        .as_u64()
        .ok_or_else(|| ChatError::InvalidPayload("Hello without heartbeat_interval".into()))
}

fn identify_payload(token: &SecretString) -> Value {
    json!({
        "op": 2,
        "d": {
            "token": token.expose_secret(),
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "cerberus",
                "device": "cerberus"
            }
        }
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": 1, "d": sequence })
}

/// Map a dispatch (opcode 0) payload to a chat event.
fn parse_dispatch(payload: &Value) -> Option<ChatEvent> {
    let data = &payload["d"];
    match payload["t"].as_str()? {
        "READY" => Some(ChatEvent::Ready {
            user_name: data["user"]["username"].as_str().unwrap_or("bot").to_string(),
        }),
        "MESSAGE_CREATE" => {
            let channel_id = data["channel_id"].as_str()?;
            Some(ChatEvent::Message(IncomingChat {
                channel: ChannelHandle::new(channel_id, data["guild_id"].as_str().map(String::from)),
                author_is_bot: data["author"]["bot"].as_bool() == Some(true),
                content: data["content"].as_str().unwrap_or_default().to_string(),
            }))
        }
        _ => None,
    }
}

fn parse_channel(body: &Value) -> Option<ChannelHandle> {
    let id = body["id"].as_str()?;
    Some(ChannelHandle::new(id, body["guild_id"].as_str().map(String::from)))
}

/// Split a message into chunks that fit Discord's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &remaining[..cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
