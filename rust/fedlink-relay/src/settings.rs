//! Loading and validation of relay settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An example
//! configuration file can be found in the `configs/` directory located in the repository root.

use std::{net::SocketAddr, path::Path};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use validator::{Validate, ValidationErrors};

pub use fedlink_core::settings::LoggingSettings;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined relay settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub api: ApiSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedlink_relay").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// REST API settings.
pub struct ApiSettings {
    /// The address to which the REST API should be bound.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "127.0.0.1:5000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_RELAY_API__BIND_ADDRESS=127.0.0.1:5000
    /// ```
    pub bind_address: SocketAddr,

    /// The maximal size in bytes of an uploaded multipart form.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// max_upload_size = 1073741824
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_RELAY_API__MAX_UPLOAD_SIZE=1073741824
    /// ```
    #[validate(range(min = 1))]
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_max_upload_size() -> u64 {
    1024 * 1024 * 1024
}

#[derive(Debug, Default, Deserialize, Clone)]
/// Federated server settings.
pub struct UpstreamSettings {
    /// The federated server used when a participant does not send a `federated_server_url`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [upstream]
    /// default_url = "http://127.0.0.1:8000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_RELAY_UPSTREAM__DEFAULT_URL=http://127.0.0.1:8000
    /// ```
    #[serde(default)]
    pub default_url: Option<Url>,
}
