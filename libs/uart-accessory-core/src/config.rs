use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{error, info};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Directory under the platform's local config dir shared by all our tools.
pub const PROJECT_CONFIG_DIR: &str = "uart-accessory";

#[derive(Debug, Error)]
pub enum ConfigurationFilePathError {
    /// The default configuration file path is not available.
    #[error("Default configuration file path is not available")]
    NotAvailable,
}

#[derive(Debug, Error)]
pub enum ConfigurationFileError {
    #[error(transparent)]
    Path(#[from] ConfigurationFilePathError),
    #[error("Configuration file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed configuration file: {0}")]
    Format(#[from] serde_json::Error),
}

/// A trait for some thing that represents a configuration file.
pub trait ConfigurationFile: Default + Serialize + DeserializeOwned {
    /// Returns a display name to describe the configuration file type.
    fn display_name() -> String;

    /// Where this file lives by default. The argument is the shared project
    /// configuration directory, but does not have to be used.
    fn get_default_path(project_config: &Path) -> Result<PathBuf, ConfigurationFilePathError>;

    fn to_bytes(&self) -> Result<Vec<u8>, ConfigurationFileError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn from_bytes(source: &[u8]) -> Result<Self, ConfigurationFileError> {
        Ok(serde_json::from_slice(source)?)
    }
}

pub fn get_default_config_path_for<T>() -> Result<PathBuf, ConfigurationFilePathError>
where
    T: ConfigurationFile,
{
    let project_config = dirs::config_local_dir()
        .map(|path| path.join(PROJECT_CONFIG_DIR))
        .ok_or(ConfigurationFilePathError::NotAvailable)?;
    T::get_default_path(project_config.as_path())
}

pub fn load_from_path<T>(path: &Path) -> Result<T, ConfigurationFileError>
where
    T: ConfigurationFile,
{
    let bytes = fs::read(path)?;
    T::from_bytes(&bytes)
}

pub fn save_to_path<T>(config: &T, path: &Path) -> Result<(), ConfigurationFileError>
where
    T: ConfigurationFile,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_bytes()?)?;
    Ok(())
}

/// Loads `path`, or the default location when `None`.
///
/// A missing file silently yields the defaults; an unreadable or malformed one
/// is logged and also yields the defaults.
pub fn load_or_default<T>(path: Option<&Path>) -> T
where
    T: ConfigurationFile,
{
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match get_default_config_path_for::<T>() {
            Ok(path) => path,
            Err(e) => {
                info!("{}: {}. Using defaults.", T::display_name(), e);
                return T::default();
            }
        },
    };

    match load_from_path::<T>(&path) {
        Ok(config) => {
            info!("Loaded {} from {}", T::display_name(), path.display());
            config
        }
        Err(ConfigurationFileError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            info!(
                "No {} at {}. Using defaults.",
                T::display_name(),
                path.display()
            );
            T::default()
        }
        Err(e) => {
            error!(
                "Failed to load configuration file {}: {}. Using default.",
                T::display_name(),
                e
            );
            T::default()
        }
    }
}
