//! In-memory accessories, permissions and channels.
//!
//! These stand in for the platform services when exercising
//! [`AccessoryConnection`](crate::connection::AccessoryConnection) without
//! hardware. Every type is a cheap handle over shared state, so a test can keep
//! a clone and poke at it while the connection owns the other.

use std::{
    collections::HashSet,
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    channel::{AccessoryChannel, ChannelReader, ChannelWriter, ReadStatus},
    host::{AccessoryEnumerator, ChannelFactory, PermissionAuthority, PermissionNotifier},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accessories are named by plain strings.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessories {
    attached: Arc<Mutex<Vec<String>>>,
}

impl MemoryAccessories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attached<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accessories = Self::new();
        for name in names {
            accessories.attach(name);
        }
        accessories
    }

    pub fn attach(&self, name: impl Into<String>) {
        lock(&self.attached).push(name.into());
    }

    pub fn detach(&self, name: &str) -> bool {
        let mut attached = lock(&self.attached);
        let before = attached.len();
        attached.retain(|attached| attached != name);
        attached.len() != before
    }
}

impl AccessoryEnumerator for MemoryAccessories {
    type Accessory = String;

    fn attached_accessories(&self) -> Vec<String> {
        lock(&self.attached).clone()
    }
}

#[derive(Debug, Default)]
struct PermissionsState {
    granted: HashSet<String>,
    pending: Option<PermissionNotifier<String>>,
    requested: usize,
    cancelled: usize,
}

/// A permission authority answered by hand.
#[derive(Debug, Clone, Default)]
pub struct MemoryPermissions {
    state: Arc<Mutex<PermissionsState>>,
}

impl MemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants access up front, as if the user had ticked "always allow".
    pub fn grant(&self, name: impl Into<String>) {
        lock(&self.state).granted.insert(name.into());
    }

    /// The accessory of the request awaiting an answer.
    pub fn pending(&self) -> Option<String> {
        lock(&self.state)
            .pending
            .as_ref()
            .map(|notifier| notifier.accessory().clone())
    }

    /// Answers the outstanding request. A grant is remembered.
    ///
    /// Returns `false` if nothing was pending or the connection is gone.
    pub fn answer(&self, granted: bool) -> bool {
        let mut state = lock(&self.state);
        let Some(notifier) = state.pending.take() else {
            return false;
        };
        if granted {
            state.granted.insert(notifier.accessory().clone());
        }
        drop(state);
        notifier.respond(granted)
    }

    pub fn request_count(&self) -> usize {
        lock(&self.state).requested
    }

    pub fn cancel_count(&self) -> usize {
        lock(&self.state).cancelled
    }
}

impl PermissionAuthority<String> for MemoryPermissions {
    fn has_permission(&self, accessory: &String) -> bool {
        lock(&self.state).granted.contains(accessory)
    }

    fn request_permission(&mut self, _accessory: &String, notifier: PermissionNotifier<String>) {
        let mut state = lock(&self.state);
        state.requested += 1;
        state.pending.replace(notifier);
    }

    fn cancel_request(&mut self, accessory: &String) {
        let mut state = lock(&self.state);
        let matches = state
            .pending
            .as_ref()
            .is_some_and(|notifier| notifier.accessory() == accessory);
        if matches {
            state.pending = None;
            state.cancelled += 1;
        }
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    fail_next_open: bool,
    opened: usize,
    peer: Option<MemoryPeer>,
}

/// Hands out [`memory_pipe`] channels and keeps the far end of the latest.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannelFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_open(&self) {
        lock(&self.state).fail_next_open = true;
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opened
    }

    /// The accessory side of the most recently opened channel.
    pub fn peer(&self) -> Option<MemoryPeer> {
        lock(&self.state).peer.clone()
    }
}

impl<A> ChannelFactory<A> for MemoryChannelFactory {
    fn open_channel(&mut self, _accessory: &A) -> io::Result<AccessoryChannel> {
        let mut state = lock(&self.state);
        if state.fail_next_open {
            state.fail_next_open = false;
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Failed to open file descriptor",
            ));
        }

        let (channel, peer) = memory_pipe();
        state.opened += 1;
        state.peer.replace(peer);
        Ok(channel)
    }
}

/// The accessory's end of an in-memory channel.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    inbound: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Makes `bytes` available to the device-side reader as one chunk.
    pub fn push(&self, bytes: &[u8]) -> bool {
        lock(&self.inbound)
            .as_ref()
            .is_some_and(|tx| tx.send(bytes.to_vec()).is_ok())
    }

    /// The reader sees end-of-stream once buffered chunks are consumed.
    pub fn hang_up(&self) {
        lock(&self.inbound).take();
    }

    /// Everything the device side has written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

/// Creates a connected channel and the handle for its far end.
pub fn memory_pipe() -> (AccessoryChannel, MemoryPeer) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let peer = MemoryPeer {
        inbound: Arc::new(Mutex::new(Some(tx))),
        written: Arc::default(),
        writes: Arc::default(),
        closed: Arc::default(),
        fail_writes: Arc::default(),
        fail_close: Arc::default(),
    };
    let reader = MemoryReader {
        inbound: rx,
        leftover: Vec::new(),
    };
    let writer = MemoryWriter { peer: peer.clone() };
    (AccessoryChannel::new(reader, writer), peer)
}

struct MemoryReader {
    inbound: Receiver<Vec<u8>>,
    leftover: Vec<u8>,
}

impl MemoryReader {
    fn take_into(&mut self, mut chunk: Vec<u8>, buf: &mut [u8]) -> usize {
        let len = chunk.len().min(buf.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        self.leftover = chunk.split_off(len);
        len
    }
}

impl ChannelReader for MemoryReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        if !self.leftover.is_empty() {
            let chunk = std::mem::take(&mut self.leftover);
            return Ok(ReadStatus::Data(self.take_into(chunk, buf)));
        }

        match self.inbound.recv_timeout(timeout) {
            Ok(chunk) => Ok(ReadStatus::Data(self.take_into(chunk, buf))),
            Err(RecvTimeoutError::Timeout) => Ok(ReadStatus::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadStatus::EndOfStream),
        }
    }
}

struct MemoryWriter {
    peer: MemoryPeer,
}

impl ChannelWriter for MemoryWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.peer.is_closed() {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if self.peer.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused"));
        }
        lock(&self.peer.written).extend_from_slice(data);
        self.peer.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.peer.closed.store(true, Ordering::SeqCst);
        if self.peer.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("close refused"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::memory_pipe;
    use crate::channel::ReadStatus;

    #[test]
    fn test_large_chunk_is_split_across_reads() {
        let (channel, peer) = memory_pipe();
        let (mut reader, _writer) = channel.into_parts();
        peer.push(b"abcdef");

        let mut buf = [0u8; 4];
        let timeout = Duration::from_millis(10);
        assert_eq!(reader.read_timeout(&mut buf, timeout).unwrap(), ReadStatus::Data(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read_timeout(&mut buf, timeout).unwrap(), ReadStatus::Data(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(reader.read_timeout(&mut buf, timeout).unwrap(), ReadStatus::TimedOut);

        peer.hang_up();
        assert_eq!(reader.read_timeout(&mut buf, timeout).unwrap(), ReadStatus::EndOfStream);
    }
}
