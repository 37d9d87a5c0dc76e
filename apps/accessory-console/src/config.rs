use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use uart_accessory_comm::device::DEFAULT_ACCESSORY_NODE;
use uart_accessory_core::{
    config::{ConfigurationFile, ConfigurationFilePathError},
    reader::ReaderConfig,
};

pub const DEFAULT_REFRESH_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub accessory_node: PathBuf,
    /// How often the node is checked for attach and detach.
    pub refresh_ms: u64,
    pub reader: ReaderConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            accessory_node: PathBuf::from(DEFAULT_ACCESSORY_NODE),
            refresh_ms: DEFAULT_REFRESH_MS,
            reader: ReaderConfig::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(1))
    }
}

impl ConfigurationFile for ConsoleConfig {
    fn display_name() -> String {
        "console configuration".to_string()
    }

    fn get_default_path(project_config: &Path) -> Result<PathBuf, ConfigurationFilePathError> {
        Ok(project_config.join("console.json"))
    }
}

/// Talk to a USB accessory from the device side.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Configuration file to load instead of the default one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Accessory device node.
    #[arg(short, long)]
    pub node: Option<PathBuf>,

    /// Attach/detach polling period in milliseconds.
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Treat the accessory as already approved.
    #[arg(long)]
    pub allow: bool,
}

impl Args {
    pub fn apply(&self, config: &mut ConsoleConfig) {
        if let Some(node) = &self.node {
            config.accessory_node = node.clone();
        }
        if let Some(refresh_ms) = self.refresh_ms {
            config.refresh_ms = refresh_ms;
        }
    }
}
