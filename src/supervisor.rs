//! Starts both workers around one duplex channel and reports how they ended.
//!
//! The forum side gets a dedicated OS thread because its client blocks. The
//! chat side runs on the caller's runtime. Neither side is restarted: when one
//! stops, the other keeps going and sees `PeerUnavailable` on send.

use std::any::Any;
use std::future::Future;
use std::thread;

use tracing::{error, info};

use crate::error::{Error, Result, WorkerError};
use crate::relay::{DuplexEnd, duplex};

const FORUM_THREAD: &str = "forum-worker";
const CHAT_TASK: &str = "chat-worker";

/// How each worker terminated.
#[derive(Debug)]
pub struct SupervisorReport {
    pub forum: Result<()>,
    pub chat: Result<()>,
}

impl SupervisorReport {
    /// Both sides returned `Ok`.
    pub fn is_clean(&self) -> bool {
        self.forum.is_ok() && self.chat.is_ok()
    }
}

pub struct Supervisor;

impl Supervisor {
    /// Run `forum` on its own thread and `chat` on the current runtime.
    ///
    /// Returns once both have finished.
    pub async fn run<F, C, Fut>(forum: F, chat: C) -> SupervisorReport
    where
        F: FnOnce(DuplexEnd) -> Result<()> + Send + 'static,
        C: FnOnce(DuplexEnd) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (forum_end, chat_end) = duplex();

        let forum_side = async move {
            let outcome = run_forum_thread(forum, forum_end).await;
            log_outcome(FORUM_THREAD, &outcome);
            outcome
        };
        let chat_side = async move {
            info!(worker = CHAT_TASK, "Worker started");
            let outcome = chat(chat_end).await;
            log_outcome(CHAT_TASK, &outcome);
            outcome
        };

        let (forum, chat) = tokio::join!(forum_side, chat_side);
        SupervisorReport { forum, chat }
    }
}

async fn run_forum_thread<F>(forum: F, end: DuplexEnd) -> Result<()>
where
    F: FnOnce(DuplexEnd) -> Result<()> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(FORUM_THREAD.to_string())
        .spawn(move || {
            info!(worker = FORUM_THREAD, "Worker started");
            forum(end)
        })
        .map_err(|e| WorkerError::SpawnFailed {
            name: FORUM_THREAD.to_string(),
            reason: e.to_string(),
        })?;

    // Join off the runtime thread so the chat side keeps running meanwhile.
    let joined = tokio::task::spawn_blocking(move || handle.join())
        .await
        .map_err(|e| WorkerError::Panicked {
            name: FORUM_THREAD.to_string(),
            reason: e.to_string(),
        })?;

    joined.map_err(|payload| {
        Error::from(WorkerError::Panicked {
            name: FORUM_THREAD.to_string(),
            reason: panic_message(payload.as_ref()),
        })
    })?
}

fn log_outcome(worker: &str, outcome: &Result<()>) {
    match outcome {
        Ok(()) => info!(worker, "Worker finished"),
        Err(e) => error!(worker, error = %e, "Worker stopped; it will not be restarted"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
