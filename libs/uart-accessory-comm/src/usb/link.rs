use std::{
    io::{self, Read, Write},
    time::Duration,
};

use log::debug;
use nusb::{
    Device, DeviceInfo, Interface,
    descriptors::TransferType,
    io::{EndpointRead, EndpointWrite},
    transfer::{Bulk, Direction, In, Out},
};
use uart_accessory_core::channel::{AccessoryChannel, ChannelReader, ChannelWriter, ReadStatus};

use crate::usb::error::UsbConnectionError;

/// Bulk transfers are split into packets of this size by default.
pub const DEFAULT_PACKET_LEN: usize = 512;

/// How long a bulk OUT transfer may wait for the device to drain it.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Interface 0 of a device in accessory mode, claimed for bulk I/O.
pub struct UsbAccessoryLink {
    device_info: DeviceInfo,
    // Keeps the device open for as long as the link lives.
    _device: Device,
    interface: Interface,
    bulk_in: u8,
    bulk_out: u8,
}

impl UsbAccessoryLink {
    pub async fn open(device_info: &DeviceInfo) -> Result<Self, UsbConnectionError> {
        let device = device_info.open().await?;
        let interface = device.detach_and_claim_interface(0).await?;
        debug!("Claimed interface: {:?}", interface);

        let (bulk_out, bulk_in) =
            find_bulk_endpoints(&interface).ok_or(UsbConnectionError::EndpointsNotFound)?;
        debug!("Bulk endpoints: in {:#04x}, out {:#04x}", bulk_in, bulk_out);

        Ok(Self {
            device_info: device_info.clone(),
            _device: device,
            interface,
            bulk_in,
            bulk_out,
        })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Splits the link into a duplex channel.
    ///
    /// `buffer_size` is the size of each IN transfer and `packet_len` the
    /// largest chunk written per OUT transfer. A write the device does not
    /// drain within `write_timeout` fails with `ErrorKind::TimedOut`.
    pub fn into_channel(
        self,
        buffer_size: usize,
        packet_len: usize,
        write_timeout: Duration,
    ) -> Result<AccessoryChannel, UsbConnectionError> {
        let reader = self
            .interface
            .endpoint::<Bulk, In>(self.bulk_in)?
            .reader(buffer_size);
        let writer = self
            .interface
            .endpoint::<Bulk, Out>(self.bulk_out)?
            .writer(packet_len)
            .with_write_timeout(write_timeout);

        Ok(AccessoryChannel::new(
            UsbReader {
                inner: reader,
                timeout: None,
            },
            UsbWriter {
                inner: Some(writer),
                _device: self._device,
            },
        ))
    }
}

/// Finds the first bulk OUT and IN endpoint addresses, in that order.
fn find_bulk_endpoints(interface: &Interface) -> Option<(u8, u8)> {
    let mut out_endpoint = None;
    let mut in_endpoint = None;

    for ep in interface.descriptor()?.endpoints() {
        // Direction is from the host's point of view.
        match (ep.transfer_type(), ep.direction()) {
            (TransferType::Bulk, Direction::Out) => {
                out_endpoint.get_or_insert(ep.address());
            }
            (TransferType::Bulk, Direction::In) => {
                in_endpoint.get_or_insert(ep.address());
            }
            _ => {}
        }
    }

    Some((out_endpoint?, in_endpoint?))
}

struct UsbReader {
    inner: EndpointRead<Bulk>,
    timeout: Option<Duration>,
}

impl ChannelReader for UsbReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        if self.timeout != Some(timeout) {
            self.inner.set_read_timeout(timeout);
            self.timeout = Some(timeout);
        }

        match self.inner.read(buf) {
            Ok(len) => Ok(ReadStatus::Data(len)),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(ReadStatus::TimedOut),
            Err(e) => Err(e),
        }
    }
}

struct UsbWriter {
    inner: Option<EndpointWrite<Bulk>>,
    _device: Device,
}

impl ChannelWriter for UsbWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let writer = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        // Ends the transfer so the device's read returns.
        let result = writer.write_all(data).and_then(|()| writer.flush_end());
        if let Err(e) = &result {
            // A stalled endpoint stays stalled; later writes fail fast.
            debug!("Bulk OUT failed ({}), dropping the endpoint", e);
            self.inner = None;
        }
        result
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
