use nusb::transfer::TransferError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsbConnectionError {
    #[error("USB device not found")]
    DeviceNotFound,
    #[error("Failed to connect to USB device: {0}")]
    ConnectionFailed(#[from] nusb::Error),
    #[error("USB transfer error: {0}")]
    TransferError(#[from] TransferError),
    #[error("Device does not support the accessory protocol")]
    ProtocolUnsupported,
    #[error("Unexpected protocol response length: {0}")]
    UnexpectedResponse(usize),
    #[error("Device did not re-enumerate in accessory mode after {0} tries")]
    ReEnumerationTimedOut(u32),
    #[error("Could not find bulk endpoints on interface")]
    EndpointsNotFound,
}
