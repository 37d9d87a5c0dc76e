use std::{io, time::Duration};

/// Outcome of a single bounded read from an accessory channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many bytes were copied into the front of the buffer.
    Data(usize),
    /// Nothing arrived before the timeout elapsed.
    TimedOut,
    /// The other side hung up.
    EndOfStream,
}

/// The receiving half of an accessory byte stream.
///
/// Implementations must return within (roughly) the given timeout, so the
/// reader thread can observe its cancellation token between reads.
pub trait ChannelReader: Send {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus>;
}

/// The sending half of an accessory byte stream.
pub trait ChannelWriter: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Releases the underlying resource. Called once, after the reader half
    /// has been stopped.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A duplex byte stream bound to one accessory.
pub struct AccessoryChannel {
    reader: Box<dyn ChannelReader>,
    writer: Box<dyn ChannelWriter>,
}

impl AccessoryChannel {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: ChannelReader + 'static,
        W: ChannelWriter + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn new_boxed(reader: Box<dyn ChannelReader>, writer: Box<dyn ChannelWriter>) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for AccessoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessoryChannel")
            .field("reader", &"ChannelReader")
            .field("writer", &"ChannelWriter")
            .finish()
    }
}
