use std::{
    io::{self, Read, Write},
    time::Duration,
};

use log::info;
use serialport::SerialPort;
use uart_accessory_core::channel::{AccessoryChannel, ChannelReader, ChannelWriter, ReadStatus};

/// Opens `path` as a duplex channel.
pub fn open_serial_channel(
    path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> io::Result<AccessoryChannel> {
    let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
    let reader = port.try_clone()?;
    info!("Opened serial port {} at {} baud", path, baud_rate);

    Ok(AccessoryChannel::new(
        SerialReader {
            port: reader,
            timeout,
        },
        SerialWriter { port: Some(port) },
    ))
}

struct SerialReader {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl ChannelReader for SerialReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        if self.timeout != timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }

        match self.port.read(buf) {
            Ok(len) => Ok(ReadStatus::Data(len)),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(ReadStatus::TimedOut),
            Err(e) => Err(e),
        }
    }
}

struct SerialWriter {
    port: Option<Box<dyn SerialPort>>,
}

impl ChannelWriter for SerialWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        port.write_all(data)?;
        port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
        }
        Ok(())
    }
}
