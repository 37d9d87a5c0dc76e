use std::time::Instant;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::ChannelWriter,
    connection::ConnectionState,
    error::AccessoryError,
    events::{AccessoryEvent, ConnectionEvent, EventSender, RequestId, SessionId, SessionSink},
    host::{AccessoryEnumerator, ChannelFactory, PermissionAuthority, PermissionNotifier},
    reader::{ReadTermination, ReaderConfig, ReaderHandle},
};

/// Streams and reader belonging to one `Open` period.
struct Session {
    id: SessionId,
    writer: Box<dyn ChannelWriter>,
    reader: ReaderHandle,
}

impl Session {
    fn shutdown(self) -> Result<(), AccessoryError> {
        let Session {
            id,
            mut writer,
            reader,
        } = self;

        let reason = reader.stop();
        debug!("Session {id} reader stopped: {reason}");

        writer.close().map_err(|e| {
            error!("Failed to properly close accessory: {}", e);
            AccessoryError::StreamCloseFailed(e)
        })
    }
}

/// The state together with whatever only exists in that state.
enum Link<A> {
    Closed,
    WaitingPermission { accessory: A, request: RequestId },
    Open { accessory: A, session: Session },
}

impl<A> Link<A> {
    fn state(&self) -> ConnectionState {
        match self {
            Link::Closed => ConnectionState::Closed,
            Link::WaitingPermission { .. } => ConnectionState::WaitingPermission,
            Link::Open { .. } => ConnectionState::Open,
        }
    }

    fn accessory(&self) -> Option<&A> {
        match self {
            Link::Closed => None,
            Link::WaitingPermission { accessory, .. } | Link::Open { accessory, .. } => {
                Some(accessory)
            }
        }
    }
}

/// Owns the lifecycle of the link to one USB accessory.
///
/// All methods take `&mut self`, so the owner task is the only place the
/// state changes. Anything asynchronous (permission answers, unplug
/// notifications, reader output) arrives as a [`ConnectionEvent`] on the
/// queue whose sender was given to [`AccessoryConnection::new`], and is fed
/// back in through [`AccessoryConnection::handle_event`].
pub struct AccessoryConnection<E, P, F>
where
    E: AccessoryEnumerator,
    P: PermissionAuthority<E::Accessory>,
    F: ChannelFactory<E::Accessory>,
{
    enumerator: E,
    permissions: P,
    channels: F,
    events: EventSender<E::Accessory>,
    reader_config: ReaderConfig,
    link: Link<E::Accessory>,
    next_session: SessionId,
    next_request: RequestId,
    last_send: Option<Instant>,
}

impl<E, P, F> AccessoryConnection<E, P, F>
where
    E: AccessoryEnumerator,
    P: PermissionAuthority<E::Accessory>,
    F: ChannelFactory<E::Accessory>,
{
    pub fn new(
        enumerator: E,
        permissions: P,
        channels: F,
        events: EventSender<E::Accessory>,
        reader_config: ReaderConfig,
    ) -> Self {
        Self {
            enumerator,
            permissions,
            channels,
            events,
            reader_config,
            link: Link::Closed,
            next_session: 1,
            next_request: 1,
            last_send: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// The targeted accessory; `None` exactly when closed.
    pub fn accessory(&self) -> Option<&E::Accessory> {
        self.link.accessory()
    }

    pub fn enumerator(&self) -> &E {
        &self.enumerator
    }

    pub fn permissions(&self) -> &P {
        &self.permissions
    }

    pub fn permissions_mut(&mut self) -> &mut P {
        &mut self.permissions
    }

    pub fn channels(&self) -> &F {
        &self.channels
    }

    /// Starts connecting to the first attached accessory.
    ///
    /// Does nothing unless closed. Ends `Open` when permission is already
    /// held, `WaitingPermission` otherwise.
    pub fn open(&mut self) -> Result<ConnectionState, AccessoryError> {
        if self.state() != ConnectionState::Closed {
            debug!("Ignoring open while {}", self.state());
            return Ok(self.state());
        }

        // Only the first accessory is ever considered.
        let Some(accessory) = self.enumerator.attached_accessories().into_iter().next() else {
            warn!("No accessory found");
            return Err(AccessoryError::NoAccessoryFound);
        };
        info!("Using accessory {:?}", accessory);

        if self.permissions.has_permission(&accessory) {
            self.open_streams(accessory)?;
        } else {
            let request = self.next_request;
            self.next_request += 1;

            self.transition(Link::WaitingPermission {
                accessory: accessory.clone(),
                request,
            })?;

            info!("Requesting permission for {:?} (request {request})", accessory);
            let notifier = PermissionNotifier::new(request, accessory.clone(), self.events.clone());
            self.permissions.request_permission(&accessory, notifier);
        }

        Ok(self.state())
    }

    /// Tears down whatever exists and ends `Closed`.
    ///
    /// A failure to close the channel is reported, but the state is `Closed`
    /// regardless.
    pub fn close(&mut self) -> Result<(), AccessoryError> {
        match self.transition(Link::Closed)? {
            Link::Closed => Ok(()),
            Link::WaitingPermission { accessory, request } => {
                info!("Cancelling permission request {request} for {:?}", accessory);
                self.permissions.cancel_request(&accessory);
                Ok(())
            }
            Link::Open { accessory, session } => {
                info!("Closing streams to {:?}", accessory);
                self.last_send = None;
                session.shutdown()
            }
        }
    }

    /// Writes `data` to the accessory.
    ///
    /// Returns `Ok(false)` without writing anything unless open.
    pub fn send(&mut self, data: &[u8]) -> Result<bool, AccessoryError> {
        let state = self.link.state();
        let Link::Open { session, .. } = &mut self.link else {
            debug!("Ignoring send while {state}");
            return Ok(false);
        };

        debug!("Sending {} bytes", data.len());
        match session.writer.write_all(data) {
            Ok(()) => {
                self.last_send = Some(Instant::now());
                Ok(true)
            }
            Err(e) => {
                warn!("Sending data failed: {}", e);
                Err(AccessoryError::SendFailed(e))
            }
        }
    }

    /// Applies one event from the owner queue.
    pub fn handle_event(
        &mut self,
        event: ConnectionEvent<E::Accessory>,
    ) -> Result<Option<AccessoryEvent>, AccessoryError> {
        match event {
            ConnectionEvent::PermissionResult {
                request,
                accessory,
                granted,
            } => self.on_permission_result(request, accessory, granted),
            ConnectionEvent::Detached(accessory) => {
                if self.accessory() != Some(&accessory) {
                    debug!("Ignoring detach of {:?}", accessory);
                    return Ok(None);
                }
                info!("Accessory {:?} detached", accessory);
                self.close()?;
                Ok(Some(AccessoryEvent::Detached))
            }
            ConnectionEvent::DataRead { session, bytes } => {
                if !self.is_current_session(session) {
                    debug!("Dropping {} bytes from stale session {session}", bytes.len());
                    return Ok(None);
                }
                let round_trip = self.last_send.map(|sent| sent.elapsed());
                Ok(Some(AccessoryEvent::Received { bytes, round_trip }))
            }
            ConnectionEvent::ReaderStopped { session, reason } => {
                if !self.is_current_session(session) || reason == ReadTermination::Cancelled {
                    return Ok(None);
                }
                warn!("Accessory reader of session {session} stopped: {reason}");
                if let Err(e) = self.close() {
                    warn!("Closing after reader stop: {}", e);
                }
                Err(AccessoryError::ReadTerminated(reason))
            }
        }
    }

    fn on_permission_result(
        &mut self,
        request: RequestId,
        accessory: E::Accessory,
        granted: bool,
    ) -> Result<Option<AccessoryEvent>, AccessoryError> {
        let expected = matches!(
            &self.link,
            Link::WaitingPermission { accessory: pending, request: pending_request }
                if *pending_request == request && *pending == accessory
        );
        if !expected {
            debug!("Ignoring stale permission result for request {request}");
            return Ok(None);
        }

        if granted {
            info!("Permission granted for {:?}", accessory);
            self.open_streams(accessory)?;
            Ok(Some(AccessoryEvent::Opened))
        } else {
            error!("Permission denied");
            self.transition(Link::Closed)?;
            Err(AccessoryError::PermissionDenied)
        }
    }

    fn open_streams(&mut self, accessory: E::Accessory) -> Result<(), AccessoryError> {
        let channel = match self.channels.open_channel(&accessory) {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open streams: {}", e);
                self.transition(Link::Closed)?;
                return Err(AccessoryError::StreamOpenFailed(e));
            }
        };
        let (reader, mut writer) = channel.into_parts();

        let id = self.next_session;
        self.next_session += 1;

        let reader = match ReaderHandle::spawn(
            format!("accessory-reader-{id}"),
            reader,
            SessionSink::new(id, self.events.clone()),
            &self.reader_config,
            CancellationToken::new(),
        ) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Failed to start accessory reader: {}", e);
                if let Err(close_err) = writer.close() {
                    warn!("Closing streams after failed reader start: {}", close_err);
                }
                self.transition(Link::Closed)?;
                return Err(AccessoryError::ReaderSpawnFailed(e));
            }
        };

        info!("Streams open to {:?} (session {id})", accessory);
        self.last_send = None;
        self.transition(Link::Open {
            accessory,
            session: Session { id, writer, reader },
        })?;
        Ok(())
    }

    fn is_current_session(&self, session: SessionId) -> bool {
        matches!(&self.link, Link::Open { session: current, .. } if current.id == session)
    }

    /// Swaps in `next` if the edge is valid, handing back the old link so the
    /// caller can release what it held.
    fn transition(&mut self, next: Link<E::Accessory>) -> Result<Link<E::Accessory>, AccessoryError> {
        let from = self.link.state();
        let to = from.transition(next.state())?;
        if from != to {
            debug!("Connection state {from} -> {to}");
        }
        Ok(std::mem::replace(&mut self.link, next))
    }
}

impl<E, P, F> Drop for AccessoryConnection<E, P, F>
where
    E: AccessoryEnumerator,
    P: PermissionAuthority<E::Accessory>,
    F: ChannelFactory<E::Accessory>,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close accessory connection on drop: {}", e);
        }
    }
}
