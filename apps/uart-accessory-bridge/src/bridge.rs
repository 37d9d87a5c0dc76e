use std::{fmt::Display, io};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use uart_accessory_core::{
    channel::{AccessoryChannel, ChannelWriter},
    reader::{ReadSink, ReadTermination, ReaderConfig, ReaderHandle},
    util::hex_dump,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AccessoryToSerial,
    SerialToAccessory,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::AccessoryToSerial => write!(f, "accessory -> serial"),
            Direction::SerialToAccessory => write!(f, "serial -> accessory"),
        }
    }
}

/// Writes whatever one side reads into the other side.
struct ForwardSink {
    direction: Direction,
    target: Box<dyn ChannelWriter>,
    // Shared by both pumps; whichever stops first takes the other down.
    token: CancellationToken,
}

impl ReadSink for ForwardSink {
    fn deliver(&mut self, bytes: &[u8]) -> bool {
        debug!("{}: {}", self.direction, hex_dump(bytes));
        match self.target.write_all(bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: write failed: {}", self.direction, e);
                false
            }
        }
    }

    fn finished(&mut self, reason: ReadTermination) {
        debug!("{}: pump stopped ({})", self.direction, reason);
        self.token.cancel();
        if let Err(e) = self.target.close() {
            debug!("{}: closing target: {}", self.direction, e);
        }
    }
}

/// How each pump of a finished bridge ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOutcome {
    pub accessory_to_serial: ReadTermination,
    pub serial_to_accessory: ReadTermination,
}

impl BridgeOutcome {
    /// Whether the serial side broke, as opposed to the accessory going away.
    pub fn serial_failed(&self) -> bool {
        matches!(
            self.serial_to_accessory,
            ReadTermination::Failed { .. } | ReadTermination::EndOfStream
        ) || self.accessory_to_serial == ReadTermination::ConsumerGone
    }
}

impl Display for BridgeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}, {}: {}",
            Direction::AccessoryToSerial,
            self.accessory_to_serial,
            Direction::SerialToAccessory,
            self.serial_to_accessory
        )
    }
}

/// Two pumps copying between an accessory and a serial port.
#[derive(Debug)]
pub struct Bridge {
    token: CancellationToken,
    accessory_to_serial: ReaderHandle,
    serial_to_accessory: ReaderHandle,
}

impl Bridge {
    /// Starts both pumps. Cancelling `parent` stops them.
    pub fn start(
        accessory: AccessoryChannel,
        serial: AccessoryChannel,
        config: &ReaderConfig,
        parent: &CancellationToken,
    ) -> io::Result<Self> {
        let token = parent.child_token();
        let (accessory_reader, accessory_writer) = accessory.into_parts();
        let (serial_reader, serial_writer) = serial.into_parts();

        let accessory_to_serial = ReaderHandle::spawn(
            "bridge-accessory-to-serial",
            accessory_reader,
            ForwardSink {
                direction: Direction::AccessoryToSerial,
                target: serial_writer,
                token: token.clone(),
            },
            config,
            token.clone(),
        )?;

        let serial_to_accessory = match ReaderHandle::spawn(
            "bridge-serial-to-accessory",
            serial_reader,
            ForwardSink {
                direction: Direction::SerialToAccessory,
                target: accessory_writer,
                token: token.clone(),
            },
            config,
            token.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                accessory_to_serial.stop();
                return Err(e);
            }
        };

        Ok(Self {
            token,
            accessory_to_serial,
            serial_to_accessory,
        })
    }

    /// Cancelled as soon as either pump stops.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stops both pumps and waits for their threads.
    pub fn stop(self) -> BridgeOutcome {
        self.token.cancel();
        BridgeOutcome {
            accessory_to_serial: self.accessory_to_serial.stop(),
            serial_to_accessory: self.serial_to_accessory.stop(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    };

    use tokio_util::sync::CancellationToken;
    use uart_accessory_core::{
        channel::{AccessoryChannel, ChannelWriter},
        memory::{MemoryPeer, memory_pipe},
        reader::{ReadTermination, ReaderConfig},
    };

    use super::Bridge;

    fn config() -> ReaderConfig {
        ReaderConfig {
            buffer_size: 1024,
            poll_interval_ms: 5,
        }
    }

    fn start() -> (Bridge, MemoryPeer, MemoryPeer, CancellationToken) {
        let (accessory, phone) = memory_pipe();
        let (serial, uart) = memory_pipe();
        let parent = CancellationToken::new();
        let bridge = Bridge::start(accessory, serial, &config(), &parent).unwrap();
        (bridge, phone, uart, parent)
    }

    /// An OUT endpoint the device never drains, failing once its timeout runs out.
    struct StalledWriter {
        entered: Arc<AtomicBool>,
        timeout: Duration,
    }

    impl ChannelWriter for StalledWriter {
        fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(self.timeout);
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_bytes_cross_in_both_directions() {
        let (bridge, phone, uart, _parent) = start();

        phone.push(b"AT\r");
        uart.push(&[0x4F, 0x4B]);
        wait_until(|| uart.written() == b"AT\r" && phone.written() == b"OK");

        let outcome = bridge.stop();
        assert_eq!(outcome.accessory_to_serial, ReadTermination::Cancelled);
        assert_eq!(outcome.serial_to_accessory, ReadTermination::Cancelled);
        assert!(!outcome.serial_failed());
        assert!(phone.is_closed());
        assert!(uart.is_closed());
    }

    #[test]
    fn test_accessory_hang_up_stops_both_pumps() {
        let (bridge, phone, _uart, parent) = start();

        phone.hang_up();
        wait_until(|| bridge.token().is_cancelled());
        assert!(!parent.is_cancelled());

        let outcome = bridge.stop();
        assert_eq!(outcome.accessory_to_serial, ReadTermination::EndOfStream);
        assert_eq!(outcome.serial_to_accessory, ReadTermination::Cancelled);
        assert!(!outcome.serial_failed());
    }

    #[test]
    fn test_serial_write_failure_is_reported() {
        let (bridge, phone, uart, _parent) = start();

        uart.fail_writes(true);
        phone.push(b"lost");
        wait_until(|| bridge.token().is_cancelled());

        let outcome = bridge.stop();
        assert_eq!(outcome.accessory_to_serial, ReadTermination::ConsumerGone);
        assert!(outcome.serial_failed());
    }

    #[test]
    fn test_parent_cancel_stops_bridge() {
        let (bridge, _phone, _uart, parent) = start();

        parent.cancel();
        assert!(bridge.token().is_cancelled());
        let outcome = bridge.stop();
        assert_eq!(outcome.accessory_to_serial, ReadTermination::Cancelled);
        assert_eq!(outcome.serial_to_accessory, ReadTermination::Cancelled);
    }

    #[test]
    fn test_stop_returns_while_accessory_write_is_stalled() {
        let (phone_side, _phone) = memory_pipe();
        let (phone_reader, _) = phone_side.into_parts();
        let entered = Arc::new(AtomicBool::new(false));
        let accessory = AccessoryChannel::new_boxed(
            phone_reader,
            Box::new(StalledWriter {
                entered: entered.clone(),
                timeout: Duration::from_millis(100),
            }),
        );
        let (serial, uart) = memory_pipe();
        let parent = CancellationToken::new();
        let bridge = Bridge::start(accessory, serial, &config(), &parent).unwrap();

        uart.push(b"stuck");
        wait_until(|| entered.load(Ordering::SeqCst));

        parent.cancel();
        let started = Instant::now();
        let outcome = bridge.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.accessory_to_serial, ReadTermination::Cancelled);
        assert_eq!(outcome.serial_to_accessory, ReadTermination::ConsumerGone);
        assert!(!outcome.serial_failed());
        assert!(uart.is_closed());
    }
}
