use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
};

use uart_accessory_core::{
    channel::AccessoryChannel,
    host::{AccessoryEnumerator, ChannelFactory},
};

use crate::fd::FdChannel;

/// Where Linux gadget and Android kernels expose the accessory function.
pub const DEFAULT_ACCESSORY_NODE: &str = "/dev/usb_accessory";

/// An accessory reachable through a character device node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNode {
    path: PathBuf,
}

impl DeviceNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }
}

impl Display for DeviceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Reports the configured node as the one attached accessory while it exists.
#[derive(Debug, Clone)]
pub struct DeviceNodeEnumerator {
    node: DeviceNode,
}

impl DeviceNodeEnumerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            node: DeviceNode::new(path),
        }
    }

    pub fn node(&self) -> &DeviceNode {
        &self.node
    }
}

impl Default for DeviceNodeEnumerator {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESSORY_NODE)
    }
}

impl AccessoryEnumerator for DeviceNodeEnumerator {
    type Accessory = DeviceNode;

    fn attached_accessories(&self) -> Vec<DeviceNode> {
        if self.node.is_present() {
            vec![self.node.clone()]
        } else {
            Vec::new()
        }
    }
}

/// Opens device nodes read/write as [`FdChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceNodeChannelFactory;

impl ChannelFactory<DeviceNode> for DeviceNodeChannelFactory {
    fn open_channel(&mut self, accessory: &DeviceNode) -> io::Result<AccessoryChannel> {
        FdChannel::open_path(accessory.path())
    }
}
