use std::time::Duration;

use tokio::sync::mpsc;

use crate::reader::{ReadSink, ReadTermination};

/// Identifies one `Open` period of a connection.
pub type SessionId = u64;

/// Identifies one permission request.
pub type RequestId = u64;

/// Everything that re-enters an [`AccessoryConnection`](crate::connection::AccessoryConnection)
/// from outside the owner task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent<A> {
    /// The permission authority answered a request.
    PermissionResult {
        request: RequestId,
        accessory: A,
        granted: bool,
    },
    /// The accessory was unplugged.
    Detached(A),
    /// The reader of `session` got some bytes.
    DataRead { session: SessionId, bytes: Vec<u8> },
    /// The reader of `session` left its loop.
    ReaderStopped {
        session: SessionId,
        reason: ReadTermination,
    },
}

/// What the owner hands to the UI after processing a [`ConnectionEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessoryEvent {
    /// Permission was granted and the streams are open.
    Opened,
    /// Bytes arrived from the accessory. `round_trip` is the time since the
    /// last successful send, if there was one in this session.
    Received {
        bytes: Vec<u8>,
        round_trip: Option<Duration>,
    },
    /// The active accessory went away and the connection was closed.
    Detached,
}

pub type EventReceiver<A> = mpsc::UnboundedReceiver<ConnectionEvent<A>>;

/// Cloneable producer side of the owner's event queue.
#[derive(Debug)]
pub struct EventSender<A> {
    inner: mpsc::UnboundedSender<ConnectionEvent<A>>,
}

impl<A> Clone for EventSender<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> EventSender<A> {
    /// Enqueues an event. Returns `false` once the owner has gone away.
    pub fn send(&self, event: ConnectionEvent<A>) -> bool {
        self.inner.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Creates the single-consumer queue an owner task drains.
pub fn event_queue<A>() -> (EventSender<A>, EventReceiver<A>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { inner: tx }, rx)
}

/// Forwards a reader's output into the owner queue, tagged with its session.
pub(crate) struct SessionSink<A> {
    session: SessionId,
    events: EventSender<A>,
}

impl<A> SessionSink<A> {
    pub(crate) fn new(session: SessionId, events: EventSender<A>) -> Self {
        Self { session, events }
    }
}

impl<A> ReadSink for SessionSink<A>
where
    A: Send + 'static,
{
    fn deliver(&mut self, bytes: &[u8]) -> bool {
        self.events.send(ConnectionEvent::DataRead {
            session: self.session,
            bytes: bytes.to_vec(),
        })
    }

    fn finished(&mut self, reason: ReadTermination) {
        self.events.send(ConnectionEvent::ReaderStopped {
            session: self.session,
            reason,
        });
    }
}
