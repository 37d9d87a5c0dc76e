use std::time::Duration;

use log::{debug, info, warn};
use nusb::{
    Device,
    transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError},
};
use serde::{Deserialize, Serialize};

use crate::usb::error::UsbConnectionError;

pub const USB_ACCESSORY_VENDOR_ID: u16 = 0x18D1;
pub const USB_ACCESSORY_PRODUCT_ID: u16 = 0x2D00;
pub const USB_ACCESSORY_ADB_PRODUCT_ID: u16 = 0x2D01;

pub const ACCESSORY_GET_PROTOCOL: u8 = 51;
pub const ACCESSORY_SEND_STRING: u8 = 52;
pub const ACCESSORY_START: u8 = 53;

pub const ACCESSORY_STRING_MANUFACTURER: u16 = 0;
pub const ACCESSORY_STRING_MODEL: u16 = 1;
pub const ACCESSORY_STRING_DESCRIPTION: u16 = 2;
pub const ACCESSORY_STRING_VERSION: u16 = 3;
pub const ACCESSORY_STRING_URI: u16 = 4;
pub const ACCESSORY_STRING_SERIAL: u16 = 5;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Whether a VID/PID pair is a device already running in accessory mode.
pub fn is_accessory_mode(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == USB_ACCESSORY_VENDOR_ID
        && (product_id == USB_ACCESSORY_PRODUCT_ID || product_id == USB_ACCESSORY_ADB_PRODUCT_ID)
}

/// The strings an Android device uses to pick the app for an accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryIdentity {
    pub manufacturer: String,
    pub model: String,
    pub description: String,
    pub version: String,
    pub uri: String,
    pub serial: String,
}

impl Default for AccessoryIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "SHINE".to_string(),
            model: "Android Accessory Emulator".to_string(),
            description: "SHINE Android Accessory Emulator".to_string(),
            version: "1.0".to_string(),
            uri: "https://github.com/shineworld/uartaccessory".to_string(),
            serial: "SHINE Emulator".to_string(),
        }
    }
}

impl AccessoryIdentity {
    /// `(string index, value)` in the order they are sent.
    pub fn strings(&self) -> [(u16, &str); 6] {
        [
            (ACCESSORY_STRING_MANUFACTURER, &self.manufacturer),
            (ACCESSORY_STRING_MODEL, &self.model),
            (ACCESSORY_STRING_DESCRIPTION, &self.description),
            (ACCESSORY_STRING_VERSION, &self.version),
            (ACCESSORY_STRING_URI, &self.uri),
            (ACCESSORY_STRING_SERIAL, &self.serial),
        ]
    }
}

/// NUL-terminated payload of an `ACCESSORY_SEND_STRING` request.
pub fn encode_accessory_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut data = Vec::with_capacity(bytes.len() + 1);
    data.extend_from_slice(bytes);
    data.push(0);
    data
}

/// Parses the `ACCESSORY_GET_PROTOCOL` response; zero means unsupported.
pub fn parse_protocol_version(response: &[u8]) -> Result<u16, UsbConnectionError> {
    // Version response is 2 bytes, one u16 value
    let [low, high] = response else {
        return Err(UsbConnectionError::UnexpectedResponse(response.len()));
    };
    match u16::from_le_bytes([*low, *high]) {
        0 => Err(UsbConnectionError::ProtocolUnsupported),
        version => Ok(version),
    }
}

pub async fn get_protocol(device: &Device) -> Result<u16, UsbConnectionError> {
    let response = device
        .control_in(
            ControlIn {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: ACCESSORY_GET_PROTOCOL,
                value: 0,
                index: 0,
                length: size_of::<u16>() as u16,
            },
            CONTROL_TIMEOUT,
        )
        .await?;
    debug!("Protocol response: {:?}", response);
    parse_protocol_version(&response)
}

async fn send_string(device: &Device, index: u16, value: &str) -> Result<(), TransferError> {
    let data = encode_accessory_string(value);
    device
        .control_out(
            ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: ACCESSORY_SEND_STRING,
                value: 0,
                index,
                data: &data,
            },
            CONTROL_TIMEOUT,
        )
        .await
}

pub async fn send_identity(
    device: &Device,
    identity: &AccessoryIdentity,
) -> Result<(), UsbConnectionError> {
    for (index, value) in identity.strings() {
        send_string(device, index, value).await?;
    }
    Ok(())
}

/// Asks the device to re-enumerate as an accessory.
///
/// Some Rockchip and AllWinner kernels answer with a shutdown error while
/// switching anyway, so a failure here is only logged.
pub async fn start_accessory(device: &Device) {
    let result = device
        .control_out(
            ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: ACCESSORY_START,
                value: 0,
                index: 0,
                data: &[],
            },
            CONTROL_TIMEOUT,
        )
        .await;

    if let Err(e) = result {
        warn!("Ignoring accessory start error: {}", e);
    }
}

/// Runs the whole mode switch and returns the device's AOA version.
///
/// The device disconnects afterwards; look for it again with
/// [`crate::usb::discovery::wait_for_accessory`].
pub async fn switch_to_accessory_mode(
    device: &Device,
    identity: &AccessoryIdentity,
) -> Result<u16, UsbConnectionError> {
    let version = get_protocol(device).await?;
    info!("Accessory protocol version: {}", version);

    send_identity(device, identity).await?;
    start_accessory(device).await;
    Ok(version)
}

#[cfg(test)]
mod test {
    use super::{
        AccessoryIdentity, encode_accessory_string, is_accessory_mode, parse_protocol_version,
    };
    use crate::usb::error::UsbConnectionError;

    #[test]
    fn test_accessory_mode_ids() {
        assert!(is_accessory_mode(0x18D1, 0x2D00));
        assert!(is_accessory_mode(0x18D1, 0x2D01));
        assert!(!is_accessory_mode(0x18D1, 0x4EE7));
        assert!(!is_accessory_mode(0x04E8, 0x2D00));
    }

    #[test]
    fn test_protocol_version_parsing() {
        assert_eq!(parse_protocol_version(&[2, 0]).unwrap(), 2);
        assert_eq!(parse_protocol_version(&[0x01, 0x01]).unwrap(), 0x0101);
        assert!(matches!(
            parse_protocol_version(&[0, 0]),
            Err(UsbConnectionError::ProtocolUnsupported)
        ));
        assert!(matches!(
            parse_protocol_version(&[1]),
            Err(UsbConnectionError::UnexpectedResponse(1))
        ));
    }

    #[test]
    fn test_strings_are_nul_terminated_in_index_order() {
        assert_eq!(encode_accessory_string("1.0"), b"1.0\0".to_vec());

        let identity = AccessoryIdentity::default();
        let indices: Vec<u16> = identity.strings().iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(identity.strings()[0].1, "SHINE");
    }
}
