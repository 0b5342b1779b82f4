//! Duplex channel joining the forum worker and the chat worker.
//!
//! Two unbounded FIFO queues, one per direction. Each [`DuplexEnd`] sends on
//! one queue and receives on the other. Sending never blocks. Receiving comes
//! in two flavours:
//!
//! - [`DuplexEnd::poll`] + [`DuplexEnd::try_receive`]: never blocks. This is
//!   the only receive path allowed inside an async runtime.
//! - [`DuplexEnd::receive`]: parks the calling OS thread until an envelope
//!   arrives. Only for the forum worker, which runs on its own thread.
//!
//! Nothing is persisted. Envelopes still queued when an end is dropped are
//! discarded (at-most-once, best-effort delivery).

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::error::ChannelError;
use crate::relay::Envelope;

/// One half of the duplex channel.
#[derive(Debug)]
pub struct DuplexEnd {
    tx: UnboundedSender<Envelope>,
    rx: UnboundedReceiver<Envelope>,
    /// Envelope pulled off the queue by `poll` and not yet handed out.
    peeked: Option<Envelope>,
}

/// Create a connected pair of ends: `(forum_end, chat_end)`.
pub fn duplex() -> (DuplexEnd, DuplexEnd) {
    let (to_chat_tx, to_chat_rx) = mpsc::unbounded_channel();
    let (to_forum_tx, to_forum_rx) = mpsc::unbounded_channel();

    let forum_end = DuplexEnd {
        tx: to_chat_tx,
        rx: to_forum_rx,
        peeked: None,
    };
    let chat_end = DuplexEnd {
        tx: to_forum_tx,
        rx: to_chat_rx,
        peeked: None,
    };
    (forum_end, chat_end)
}

impl DuplexEnd {
    /// Queue an envelope for the opposite end.
    ///
    /// Fails with [`ChannelError::PeerUnavailable`] once the peer is dropped.
    pub fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        self.tx
            .send(envelope)
            .map_err(|_| ChannelError::PeerUnavailable)
    }

    /// True iff an envelope is waiting. Never blocks.
    ///
    /// A `true` result is sticky: the next `try_receive` or `receive` returns
    /// that envelope.
    pub fn poll(&mut self) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(envelope) => {
                self.peeked = Some(envelope);
                true
            }
            Err(_) => false,
        }
    }

    /// Take the next envelope if one is waiting. Never blocks.
    ///
    /// Returns `Err(PeerUnavailable)` only when nothing is queued and the peer
    /// has gone away.
    pub fn try_receive(&mut self) -> Result<Option<Envelope>, ChannelError> {
        if let Some(envelope) = self.peeked.take() {
            return Ok(Some(envelope));
        }
        match self.rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::PeerUnavailable),
        }
    }

    /// Block the current thread until an envelope arrives.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn receive(&mut self) -> Result<Envelope, ChannelError> {
        if let Some(envelope) = self.peeked.take() {
            return Ok(envelope);
        }
        self.rx
            .blocking_recv()
            .ok_or(ChannelError::PeerUnavailable)
    }

    /// Whether the opposite end is still alive.
    pub fn peer_available(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_within_one_direction() {
        let (forum, mut chat) = duplex();
        forum.send(Envelope::new("A", "1")).unwrap();
        forum.send(Envelope::new("B", "2")).unwrap();

        assert_eq!(chat.try_receive().unwrap().unwrap().title(), "A");
        assert_eq!(chat.try_receive().unwrap().unwrap().title(), "B");
        assert_eq!(chat.try_receive().unwrap(), None);
    }

    #[test]
    fn directions_are_independent() {
        let (mut forum, mut chat) = duplex();
        forum.send(Envelope::new("to chat", " ")).unwrap();
        chat.send(Envelope::new("to forum", " ")).unwrap();

        assert_eq!(forum.receive().unwrap().title(), "to forum");
        assert_eq!(chat.try_receive().unwrap().unwrap().title(), "to chat");
        assert!(!forum.poll());
        assert!(!chat.poll());
    }

    #[test]
    fn poll_does_not_consume() {
        let (forum, mut chat) = duplex();
        assert!(!chat.poll());

        forum.send(Envelope::new("A", "1")).unwrap();
        assert!(chat.poll());
        assert!(chat.poll());
        assert_eq!(chat.try_receive().unwrap(), Some(Envelope::new("A", "1")));
        assert!(!chat.poll());
    }

    #[test]
    fn poll_keeps_order_with_later_messages() {
        let (forum, mut chat) = duplex();
        forum.send(Envelope::new("A", " ")).unwrap();
        assert!(chat.poll());
        forum.send(Envelope::new("B", " ")).unwrap();

        assert_eq!(chat.try_receive().unwrap().unwrap().title(), "A");
        assert_eq!(chat.try_receive().unwrap().unwrap().title(), "B");
    }

    #[test]
    fn send_fails_after_peer_dropped() {
        let (forum, chat) = duplex();
        drop(chat);
        assert!(!forum.peer_available());
        assert_eq!(
            forum.send(Envelope::titled("lost")),
            Err(ChannelError::PeerUnavailable)
        );
    }

    #[test]
    fn receive_fails_instead_of_hanging_when_peer_gone() {
        let (mut forum, chat) = duplex();
        drop(chat);
        assert_eq!(forum.receive(), Err(ChannelError::PeerUnavailable));
    }

    #[test]
    fn queued_messages_survive_peer_drop() {
        let (forum, mut chat) = duplex();
        forum.send(Envelope::titled("last words")).unwrap();
        drop(forum);

        assert_eq!(chat.try_receive().unwrap(), Some(Envelope::titled("last words")));
        assert_eq!(chat.try_receive(), Err(ChannelError::PeerUnavailable));
    }

    #[test]
    fn unconsumed_messages_are_lost_with_the_receiver() {
        let (forum, chat) = duplex();
        forum.send(Envelope::titled("never delivered")).unwrap();
        drop(chat);
        // Nothing is persisted; the queued envelope is gone with its receiver.
        assert_eq!(
            forum.send(Envelope::titled("after")),
            Err(ChannelError::PeerUnavailable)
        );
    }

    #[test]
    fn blocking_receive_wakes_on_send_from_other_thread() {
        let (mut forum, chat) = duplex();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            chat.send(Envelope::new("late", "arrival")).unwrap();
            chat
        });

        assert_eq!(forum.receive().unwrap(), Envelope::new("late", "arrival"));
        drop(sender.join().unwrap());
    }
}
