use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use uart_accessory_comm::usb::{
    discovery::HandshakeSettings,
    link::{DEFAULT_PACKET_LEN, DEFAULT_WRITE_TIMEOUT},
};
use uart_accessory_core::{
    config::{ConfigurationFile, ConfigurationFilePathError},
    reader::ReaderConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub handshake: HandshakeSettings,
    /// Pause between "looking for accessory" scans.
    pub scan_period_ms: u64,
    /// Size of each bulk IN transfer, and of each read on either side.
    pub usb_buffer_size: usize,
    pub packet_len: usize,
    /// A bulk OUT write the phone does not drain in time fails the bridge.
    pub usb_write_timeout_ms: u64,
    /// How long a single read on either side may block.
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            handshake: HandshakeSettings::default(),
            scan_period_ms: 500,
            usb_buffer_size: 1024,
            packet_len: DEFAULT_PACKET_LEN,
            usb_write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 2,
        }
    }
}

impl BridgeConfig {
    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.scan_period_ms)
    }

    pub fn usb_write_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_write_timeout_ms.max(1))
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            buffer_size: self.usb_buffer_size,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

impl ConfigurationFile for BridgeConfig {
    fn display_name() -> String {
        "bridge configuration".to_string()
    }

    fn get_default_path(project_config: &Path) -> Result<PathBuf, ConfigurationFilePathError> {
        Ok(project_config.join("bridge.json"))
    }
}

/// Bridge an Android device in accessory mode to a serial port.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Configuration file to load instead of the default one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port device.
    #[arg(short, long)]
    pub port: Option<String>,

    /// Serial baud rate.
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Times to look for the device after switching it to accessory mode.
    #[arg(long)]
    pub tries: Option<u32>,
}

impl Args {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(port) = &self.port {
            config.serial_port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(tries) = self.tries {
            config.handshake.connect_tries = tries;
        }
    }
}
