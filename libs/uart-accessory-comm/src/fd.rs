use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
    path::Path,
    time::Duration,
};

use log::debug;
use uart_accessory_core::channel::{AccessoryChannel, ChannelReader, ChannelWriter, ReadStatus};

/// An accessory stream backed by a file descriptor.
///
/// This is what a platform accessory service hands out once access is
/// granted (`/dev/usb_accessory` on Linux gadget and Android kernels). The
/// reader half polls with a timeout, so stopping it never depends on closing
/// the descriptor underneath a blocked `read`.
pub struct FdChannel;

impl FdChannel {
    pub fn open_path(path: &Path) -> io::Result<AccessoryChannel> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!("Opened accessory node {}", path.display());
        Self::from_file(file)
    }

    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<AccessoryChannel> {
        Self::from_file(File::from(fd))
    }

    /// Takes ownership of a descriptor received from outside Rust.
    ///
    /// # Safety
    ///
    /// `fd` must be open and owned by nobody else; it is closed when the
    /// channel is closed.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<AccessoryChannel> {
        Self::from_file(unsafe { File::from_raw_fd(fd) })
    }

    fn from_file(file: File) -> io::Result<AccessoryChannel> {
        // Reader and writer each own a descriptor, so the writer can close its
        // own and report the result.
        let reader = FdReader {
            file: file.try_clone()?,
        };
        let writer = FdWriter { file: Some(file) };
        Ok(AccessoryChannel::new(reader, writer))
    }
}

struct FdReader {
    file: File,
}

impl ChannelReader for FdReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(ReadStatus::TimedOut);
        }
        if pollfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        // Readable, hung up or errored: `read` tells which.
        match self.file.read(buf)? {
            0 => Ok(ReadStatus::EndOfStream),
            len => Ok(ReadStatus::Data(len)),
        }
    }
}

struct FdWriter {
    file: Option<File>,
}

impl ChannelWriter for FdWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        Write::write_all(file, data)?;
        file.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        // `File`'s drop swallows errors from close(2).
        let fd = file.into_raw_fd();
        if unsafe { libc::close(fd) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
