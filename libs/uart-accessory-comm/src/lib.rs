//! Concrete transports for accessory links.
//!
//! - [`fd`] and [`device`]: the device side, where the platform hands out a
//!   file descriptor (or a device node) for the accessory stream.
//! - [`usb`]: the host side, which talks the AOA handshake to an Android
//!   device and exchanges data over its bulk endpoints.

#[cfg(unix)]
pub mod device;
#[cfg(unix)]
pub mod fd;

#[cfg(feature = "usb-host")]
pub mod usb;
