use std::time::Duration;

use log::{debug, info, warn};
use nusb::{DeviceInfo, list_devices};
use serde::{Deserialize, Serialize};

use crate::usb::{
    aoa::{AccessoryIdentity, is_accessory_mode, switch_to_accessory_mode},
    error::UsbConnectionError,
    link::UsbAccessoryLink,
};

/// VMware virtual hubs and mice.
pub const VMWARE_VENDOR_ID: u16 = 0x0E0F;
/// FTDI serial adapters, usually the bridge's own UART.
pub const FTDI_VENDOR_ID: u16 = 0x0403;

pub const DEFAULT_CONNECT_TRIES: u32 = 15;
pub const DEFAULT_CONNECT_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    pub identity: AccessoryIdentity,
    /// How many times to look for the device after asking it to switch.
    pub connect_tries: u32,
    pub connect_delay_ms: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            identity: AccessoryIdentity::default(),
            connect_tries: DEFAULT_CONNECT_TRIES,
            connect_delay_ms: DEFAULT_CONNECT_DELAY_MS,
        }
    }
}

impl HandshakeSettings {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

/// An Android device in accessory mode with its interface claimed.
pub struct ConnectedAccessory {
    /// IDs the device had before switching.
    pub vendor_id: u16,
    pub product_id: u16,
    /// `None` when the device was already in accessory mode.
    pub protocol_version: Option<u16>,
    pub link: UsbAccessoryLink,
}

/// Whether a device with this class and vendor might be an Android phone.
pub fn is_candidate_ids(class: u8, vendor_id: u16) -> bool {
    class == 0 && vendor_id != VMWARE_VENDOR_ID && vendor_id != FTDI_VENDOR_ID
}

pub fn is_candidate(device_info: &DeviceInfo) -> bool {
    is_candidate_ids(device_info.class(), device_info.vendor_id())
}

/// A re-enumerated device matches when the serial it had before the switch
/// (if any) is unchanged.
pub fn serial_matches(expected: Option<&str>, found: Option<&str>) -> bool {
    match expected {
        Some(serial) => found == Some(serial),
        None => true,
    }
}

pub async fn list_candidates() -> Vec<DeviceInfo> {
    match list_devices().await {
        Ok(devices) => devices.filter(is_candidate).collect(),
        Err(e) => {
            warn!("Failed to list USB devices: {}", e);
            Vec::new()
        }
    }
}

pub async fn find_accessory_device(serial: Option<&str>) -> Option<DeviceInfo> {
    list_devices().await.ok().and_then(|mut devices| {
        devices.find(|device_info| {
            is_accessory_mode(device_info.vendor_id(), device_info.product_id())
                && serial_matches(serial, device_info.serial_number())
        })
    })
}

/// Polls until a device re-enumerates in accessory mode.
pub async fn wait_for_accessory(
    serial: Option<&str>,
    tries: u32,
    delay: Duration,
) -> Result<DeviceInfo, UsbConnectionError> {
    for attempt in 1..=tries {
        if let Some(device_info) = find_accessory_device(serial).await {
            debug!("Found device in accessory mode: {:?}", device_info);
            return Ok(device_info);
        }

        debug!(
            "Waiting {}ms for device to re-enumerate in accessory mode... ({}/{})",
            delay.as_millis(),
            attempt,
            tries
        );
        futures_timer::Delay::new(delay).await;
    }

    Err(UsbConnectionError::ReEnumerationTimedOut(tries))
}

/// Brings one device into accessory mode and claims it.
pub async fn connect_accessory(
    device_info: DeviceInfo,
    settings: &HandshakeSettings,
) -> Result<ConnectedAccessory, UsbConnectionError> {
    let vendor_id = device_info.vendor_id();
    let product_id = device_info.product_id();

    if is_accessory_mode(vendor_id, product_id) {
        info!("Device {:04x}:{:04x} is already an accessory", vendor_id, product_id);
        return Ok(ConnectedAccessory {
            vendor_id,
            product_id,
            protocol_version: None,
            link: UsbAccessoryLink::open(&device_info).await?,
        });
    }

    info!("Using target device: {:?}", device_info);
    let serial = device_info.serial_number().map(str::to_owned);

    let device = device_info.open().await?;
    let version = switch_to_accessory_mode(&device, &settings.identity).await?;
    drop(device);

    let accessory_info = wait_for_accessory(
        serial.as_deref(),
        settings.connect_tries,
        settings.connect_delay(),
    )
    .await?;

    Ok(ConnectedAccessory {
        vendor_id,
        product_id,
        protocol_version: Some(version),
        link: UsbAccessoryLink::open(&accessory_info).await?,
    })
}

/// Tries every candidate in enumeration order and keeps the first that works.
pub async fn connect_first_accessory(
    settings: &HandshakeSettings,
) -> Result<ConnectedAccessory, UsbConnectionError> {
    for device_info in list_candidates().await {
        let ids = format!("{:04x}:{:04x}", device_info.vendor_id(), device_info.product_id());
        match connect_accessory(device_info, settings).await {
            Ok(connected) => return Ok(connected),
            Err(e) => debug!("Skipping {}: {}", ids, e),
        }
    }
    Err(UsbConnectionError::DeviceNotFound)
}
