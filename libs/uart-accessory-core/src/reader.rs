use std::{
    fmt::Display,
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelReader, ReadStatus};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 16384;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Largest chunk handed over per read.
    pub buffer_size: usize,
    /// Upper bound on how long a single read may block before the
    /// cancellation token is checked again.
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_READ_BUFFER_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Why a read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTermination {
    /// The token was cancelled.
    Cancelled,
    /// The peer closed the stream.
    EndOfStream,
    /// A read failed.
    Failed { kind: io::ErrorKind, message: String },
    /// Nobody is listening for the data anymore.
    ConsumerGone,
}

impl ReadTermination {
    fn failed(error: &io::Error) -> Self {
        ReadTermination::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl Display for ReadTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadTermination::Cancelled => write!(f, "cancelled"),
            ReadTermination::EndOfStream => write!(f, "end of stream"),
            ReadTermination::Failed { message, .. } => write!(f, "read failed: {}", message),
            ReadTermination::ConsumerGone => write!(f, "consumer gone"),
        }
    }
}

/// Where a read loop puts what it reads.
pub trait ReadSink: Send + 'static {
    /// Hands over one chunk. Returning `false` stops the loop.
    fn deliver(&mut self, bytes: &[u8]) -> bool;

    /// Called exactly once, after the loop has ended.
    fn finished(&mut self, _reason: ReadTermination) {}
}

/// A background thread draining a [`ChannelReader`] into a [`ReadSink`].
///
/// Dropping the handle cancels the loop without waiting for it; use
/// [`ReaderHandle::stop`] to wait.
#[derive(Debug)]
pub struct ReaderHandle {
    name: String,
    token: CancellationToken,
    thread: Option<JoinHandle<ReadTermination>>,
}

impl ReaderHandle {
    pub fn spawn<S>(
        name: impl Into<String>,
        mut reader: Box<dyn ChannelReader>,
        mut sink: S,
        config: &ReaderConfig,
        token: CancellationToken,
    ) -> io::Result<Self>
    where
        S: ReadSink,
    {
        let name = name.into();
        let buffer_size = config.buffer_size.max(1);
        let poll_interval = config.poll_interval();
        let loop_token = token.clone();
        let loop_name = name.clone();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!("{loop_name}: read thread start");
            let reason = read_loop(
                reader.as_mut(),
                &mut sink,
                buffer_size,
                poll_interval,
                &loop_token,
            );
            debug!("{loop_name}: read thread stop ({reason})");
            sink.finished(reason.clone());
            reason
        })?;

        Ok(Self {
            name,
            token,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    /// Cancels the loop and waits for the thread to exit.
    pub fn stop(mut self) -> ReadTermination {
        self.token.cancel();
        let Some(thread) = self.thread.take() else {
            return ReadTermination::Cancelled;
        };
        match thread.join() {
            Ok(reason) => reason,
            Err(_) => {
                warn!("{}: read thread panicked", self.name);
                ReadTermination::Failed {
                    kind: io::ErrorKind::Other,
                    message: "read thread panicked".to_string(),
                }
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn read_loop<S>(
    reader: &mut dyn ChannelReader,
    sink: &mut S,
    buffer_size: usize,
    poll_interval: Duration,
    token: &CancellationToken,
) -> ReadTermination
where
    S: ReadSink,
{
    let mut buffer = vec![0u8; buffer_size];

    loop {
        if token.is_cancelled() {
            return ReadTermination::Cancelled;
        }

        match reader.read_timeout(&mut buffer, poll_interval) {
            Ok(ReadStatus::Data(0)) | Ok(ReadStatus::TimedOut) => continue,
            Ok(ReadStatus::Data(len)) => {
                debug!("read {} bytes", len);
                if !sink.deliver(&buffer[..len]) {
                    return ReadTermination::ConsumerGone;
                }
            }
            Ok(ReadStatus::EndOfStream) => return ReadTermination::EndOfStream,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                ) =>
            {
                continue;
            }
            Err(e) => {
                warn!("read failed: {}", e);
                return ReadTermination::failed(&e);
            }
        }
    }
}
