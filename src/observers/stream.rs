//! Channel-backed streams of sent messages.

use crate::error::{ObserverResult, Result};
use crate::intercept::{Invocation, Target};
use crate::observers::types::{EventKind, Token};
use crate::types::Selector;
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Events delivered on a [`MessageStream`].
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// The observed selector was sent.
    Message(Invocation),
    /// The target was torn down; no further events follow.
    Completed,
    /// The stream was cut off; no further events follow.
    Dropped(DropReason),
}

/// Why a stream stopped receiving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
}

type TokenSlot = Arc<Mutex<Vec<Token>>>;

fn dispose_all(slot: &TokenSlot) {
    let tokens = std::mem::take(&mut *slot.lock());
    for token in tokens {
        token.dispose();
    }
}

/// Sending half. The channel holds one slot more than the buffer so the
/// terminal event always fits; `closed` serializes the capacity check with
/// the send.
struct Sink {
    sender: Sender<StreamEvent>,
    buffer_size: usize,
    closed: Mutex<bool>,
}

impl Sink {
    /// Deliver a message. Returns false once the stream is closed.
    fn message(&self, invocation: &Invocation) -> bool {
        let mut closed = self.closed.lock();
        if *closed {
            return false;
        }
        if self.sender.len() >= self.buffer_size {
            warn!(selector = %invocation.selector(), "message stream overflowed, dropping");
            *closed = true;
            let _ = self.sender.try_send(StreamEvent::Dropped(DropReason::BufferOverflow));
            return false;
        }
        if self.sender.try_send(StreamEvent::Message(invocation.clone())).is_err() {
            // Receiver gone.
            *closed = true;
            return false;
        }
        true
    }

    fn complete(&self) {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            let _ = self.sender.try_send(StreamEvent::Completed);
        }
    }
}

/// Receiver side of a sent-message subscription.
///
/// The stream ends with exactly one of [`StreamEvent::Completed`] or
/// [`StreamEvent::Dropped`] unless it is disposed first. Dropping the stream
/// disposes its registrations.
pub struct MessageStream {
    selector: Selector,
    tokens: TokenSlot,
    receiver: Receiver<StreamEvent>,
}

impl MessageStream {
    /// Open a stream on `target`. With `hooked` false the message observer
    /// is registered without a hook, for callers that dispatch themselves.
    pub(crate) fn open(
        target: &Target,
        selector: Selector,
        buffer_size: usize,
        hooked: bool,
    ) -> Result<Self> {
        let (sender, receiver) = bounded(buffer_size + 1);
        let sink = Arc::new(Sink {
            sender,
            buffer_size,
            closed: Mutex::new(false),
        });
        let tokens: TokenSlot = Arc::new(Mutex::new(Vec::new()));

        let message_sink = Arc::clone(&sink);
        let message_tokens = Arc::clone(&tokens);
        let on_message = move |invocation: &Invocation| -> ObserverResult {
            if !message_sink.message(invocation) {
                dispose_all(&message_tokens);
            }
            Ok(())
        };
        let kind = EventKind::MessageSent(selector.clone());
        let message = if hooked {
            target.observe(kind, on_message, false)?
        } else {
            target.observe_unhooked(kind, on_message)?
        };
        tokens.lock().push(message);

        let on_teardown = move |_: &Invocation| -> ObserverResult {
            sink.complete();
            Ok(())
        };
        match target.observe(EventKind::Deallocating, on_teardown, false) {
            Ok(completion) => tokens.lock().push(completion),
            Err(e) => {
                dispose_all(&tokens);
                return Err(e);
            }
        }

        Ok(Self {
            selector,
            tokens,
            receiver,
        })
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        let tokens = self.tokens.lock();
        !tokens.is_empty() && tokens.iter().all(|t| !t.is_disposed())
    }

    /// Stop receiving. Already buffered events remain readable.
    pub fn dispose(&self) {
        dispose_all(&self.tokens);
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<StreamEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<StreamEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<StreamEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("selector", &self.selector)
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        dispose_all(&self.tokens);
    }
}
