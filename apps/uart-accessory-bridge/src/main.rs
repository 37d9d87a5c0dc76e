use std::{fmt::Display, time::Duration};

use anyhow::Context;
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use tokio_util::sync::CancellationToken;
use uart_accessory_comm::usb::discovery::{ConnectedAccessory, connect_first_accessory};
use uart_accessory_core::config::load_or_default;

use crate::{
    bridge::Bridge,
    config::{Args, BridgeConfig},
    serial::open_serial_channel,
};

mod bridge;
mod config;
mod serial;

/// Scans until an accessory is connected, or `None` once shut down.
async fn find_accessory(
    config: &BridgeConfig,
    shutdown: &CancellationToken,
) -> Option<ConnectedAccessory> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            result = connect_first_accessory(&config.handshake) => match result {
                Ok(connected) => return Some(connected),
                Err(e) => debug!("No accessory yet: {}", e),
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(config.scan_period()) => {}
        }
    }
}

fn describe(connected: &ConnectedAccessory) -> String {
    let info = connected.link.device_info();
    let version = match connected.protocol_version {
        Some(version) => format!("version {version}"),
        None => "already in accessory mode".to_string(),
    };
    format!(
        "Found Android device with ID={:04x}:{:04x} now connected as ID={:04x}:{:04x}, {}",
        connected.vendor_id,
        connected.product_id,
        info.vendor_id(),
        info.product_id(),
        version
    )
}

/// Logs a failure that should send the bridge back to scanning.
fn rescan_on_error<T, E: Display>(result: Result<T, E>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed, rescanning: {}", what, e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut config: BridgeConfig = load_or_default(args.config.as_deref());
    args.apply(&mut config);
    debug!("Using {:?}", config);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                shutdown.cancel();
            }
        });
    }

    while !shutdown.is_cancelled() {
        info!("Looking for accessory device...");
        let Some(connected) = find_accessory(&config, &shutdown).await else {
            break;
        };
        info!("{}", describe(&connected));

        let channel = connected.link.into_channel(
            config.usb_buffer_size,
            config.packet_len,
            config.usb_write_timeout(),
        );
        let Some(accessory) = rescan_on_error(channel, "Opening accessory endpoints") else {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(config.scan_period()) => {}
            }
            continue;
        };
        let serial = open_serial_channel(
            &config.serial_port,
            config.baud_rate,
            Duration::from_millis(config.poll_interval_ms.max(1)),
        )
        .with_context(|| format!("Unable to open serial port {}", config.serial_port))?;

        info!("Bridging accessory and {}", config.serial_port);
        let bridge = Bridge::start(accessory, serial, &config.reader_config(), &shutdown)?;
        bridge.token().cancelled().await;

        let outcome = tokio::task::spawn_blocking(move || bridge.stop()).await?;
        info!("Bridge stopped ({})", outcome);
        if outcome.serial_failed() {
            anyhow::bail!("Serial port {} failed", config.serial_port);
        }
        if !shutdown.is_cancelled() {
            warn!("AOA device disconnected!");
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io;

    use super::rescan_on_error;

    #[test]
    fn test_rescan_on_error_passes_value_through() {
        let result: Result<u8, io::Error> = Ok(7);
        assert_eq!(rescan_on_error(result, "Opening"), Some(7));
    }

    #[test]
    fn test_rescan_on_error_swallows_failure() {
        let result: Result<u8, io::Error> = Err(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(rescan_on_error(result, "Opening"), None);
    }
}
