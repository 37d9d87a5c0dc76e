//! Device-side lifecycle of a USB accessory (AOA) link.
//!
//! [`connection::AccessoryConnection`] drives the
//! `Closed -> WaitingPermission -> Open -> Closed` cycle on top of the
//! platform services described in [`host`], reading the accessory stream on a
//! background thread that reports back through an [`events`] queue.

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod host;
pub mod memory;
pub mod reader;
pub mod util;
